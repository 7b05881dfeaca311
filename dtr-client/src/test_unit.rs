//! Test units, the per-test context, and test discovery.
//!
//! A test is a [`TestUnit`] type plus one of its methods. The loader resolves
//! the driver's [`TestMetadata`] to a [`ResolvedTest`], which the controller
//! turns into the process's single [`TestContext`]. Each attempt instantiates
//! a fresh [`TestInstance`] from the context.

use crate::interrupt::InterruptFlag;
use crate::services::{Service, ServiceHandle, ServiceRegistry};
use anyhow::Context as _;
use dtr_common::{ClusterDescriptor, SessionContext, TestMetadata, TestStatus};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Hooks of a test class. Every hook defaults to doing nothing.
pub trait TestUnit: Send {
    fn setup(&mut self, _ctx: &mut TestContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut TestContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Collect logs of the attempt's services into the results directory.
    fn copy_service_logs(
        &mut self,
        _ctx: &mut TestContext,
        _status: TestStatus,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return any nodes still leased to the cluster.
    fn free_nodes(&mut self, _ctx: &mut TestContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Test method: receives the unit and the context, returns optional artifact data.
pub type TestMethod<T> = fn(&mut T, &mut TestContext) -> anyhow::Result<Option<Value>>;

/// An instantiated test: a unit bound to the method under test.
pub trait TestInstance: Send {
    fn setup(&mut self, ctx: &mut TestContext) -> anyhow::Result<()>;
    fn run(&mut self, ctx: &mut TestContext) -> anyhow::Result<Option<Value>>;
    fn teardown(&mut self, ctx: &mut TestContext) -> anyhow::Result<()>;
    fn copy_service_logs(&mut self, ctx: &mut TestContext, status: TestStatus)
    -> anyhow::Result<()>;
    fn free_nodes(&mut self, ctx: &mut TestContext) -> anyhow::Result<()>;
}

struct BoundMethod<T> {
    unit: T,
    method: TestMethod<T>,
}

impl<T: TestUnit> TestInstance for BoundMethod<T> {
    fn setup(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        self.unit.setup(ctx)
    }

    fn run(&mut self, ctx: &mut TestContext) -> anyhow::Result<Option<Value>> {
        (self.method)(&mut self.unit, ctx)
    }

    fn teardown(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        self.unit.teardown(ctx)
    }

    fn copy_service_logs(
        &mut self,
        ctx: &mut TestContext,
        status: TestStatus,
    ) -> anyhow::Result<()> {
        self.unit.copy_service_logs(ctx, status)
    }

    fn free_nodes(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        self.unit.free_nodes(ctx)
    }
}

/// Builds a fresh instance of a test for one attempt.
pub type TestFactory =
    Arc<dyn Fn(&mut TestContext) -> anyhow::Result<Box<dyn TestInstance>> + Send + Sync>;

/// Outcome of discovery for one test.
#[derive(Clone)]
pub struct ResolvedTest {
    pub metadata: TestMetadata,
    pub factory: TestFactory,
    /// The test is marked as ignored and must not execute.
    pub ignore: bool,
}

impl fmt::Debug for ResolvedTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTest")
            .field("metadata", &self.metadata)
            .field("ignore", &self.ignore)
            .finish_non_exhaustive()
    }
}

/// Everything the test sees while it runs.
///
/// Exactly one context exists per process. It is created after discovery,
/// shared by every attempt, and closed once after the final result was sent.
pub struct TestContext {
    metadata: TestMetadata,
    session: Arc<SessionContext>,
    test_index: u32,
    ignore: bool,
    factory: TestFactory,
    interrupt: InterruptFlag,
    /// Nodes allotted to the test.
    pub cluster: ClusterDescriptor,
    /// Services of the current attempt.
    pub services: ServiceRegistry,
    closed: bool,
}

impl TestContext {
    pub fn new(
        resolved: ResolvedTest,
        session: Arc<SessionContext>,
        cluster: ClusterDescriptor,
        test_index: u32,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            metadata: resolved.metadata,
            session,
            test_index,
            ignore: resolved.ignore,
            factory: resolved.factory,
            interrupt,
            cluster,
            services: ServiceRegistry::new(),
            closed: false,
        }
    }

    pub fn metadata(&self) -> &TestMetadata {
        &self.metadata
    }

    /// Dotted `module.Class.method` name.
    pub fn test_name(&self) -> String {
        self.metadata.qualified_name()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn test_index(&self) -> u32 {
        self.test_index
    }

    pub fn injected_args(&self) -> Option<&Value> {
        self.metadata.injected_args.as_ref()
    }

    pub fn ignore(&self) -> bool {
        self.ignore
    }

    /// `<session results dir>/<test name>/<test index>`
    pub fn results_dir(&self) -> PathBuf {
        self.session
            .results_dir
            .join(self.test_name())
            .join(self.test_index.to_string())
    }

    /// Whether a process interrupt is pending. Long-running test bodies may poll this.
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Register a started service with the current attempt.
    pub fn register_service<S: Service + 'static>(&mut self, service: S) -> ServiceHandle<S> {
        self.services.register(service)
    }

    /// Create a fresh test instance for an attempt.
    pub fn instantiate(&mut self) -> anyhow::Result<Box<dyn TestInstance>> {
        let factory = Arc::clone(&self.factory);
        factory(self).with_context(|| format!("failed to instantiate {}", self.test_name()))
    }

    /// Start a new attempt with an empty service registry.
    ///
    /// The previous attempt's entries must already have been appended to the
    /// cumulative registry.
    pub fn begin_attempt(&mut self) {
        self.services = ServiceRegistry::new();
    }

    /// Attach the registry that is reported with the final result.
    pub fn attach_services(&mut self, services: ServiceRegistry) {
        self.services = services;
    }

    /// Move the context out for a hook running on another thread.
    ///
    /// `self` becomes a stand-in sharing the session and the service
    /// registry, so services registered by the hook remain reachable for
    /// teardown if the hook never returns. The cluster is a snapshot.
    pub(crate) fn detach(&mut self) -> TestContext {
        let stand_in = TestContext {
            metadata: self.metadata.clone(),
            session: Arc::clone(&self.session),
            test_index: self.test_index,
            ignore: self.ignore,
            factory: Arc::clone(&self.factory),
            interrupt: self.interrupt.clone(),
            cluster: self.cluster.clone(),
            services: self.services.share(),
            closed: self.closed,
        };
        std::mem::replace(self, stand_in)
    }

    /// Release the context's resources. Only the first call has an effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!(test = %self.test_name(), services = self.services.len(), "closing test context");
        self.services = ServiceRegistry::new();
        self.closed = true;
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("test", &self.test_name())
            .field("test_index", &self.test_index)
            .field("ignore", &self.ignore)
            .field("services", &self.services)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Resolves driver-supplied metadata to local tests.
pub trait TestLoader {
    /// Every test matching the metadata. The controller requires exactly one.
    fn discover(&self, metadata: &TestMetadata) -> anyhow::Result<Vec<ResolvedTest>>;
}

struct RegisteredTest {
    module: String,
    cls_name: String,
    method_name: String,
    factory: TestFactory,
    ignore: bool,
}

/// A [`TestLoader`] over tests compiled into the binary.
#[derive(Default)]
pub struct TestRegistry {
    tests: Vec<RegisteredTest>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module.Class.method`, built by `ctor` and executed by `method`.
    pub fn register<T, F>(
        &mut self,
        module: &str,
        cls_name: &str,
        method_name: &str,
        ctor: F,
        method: TestMethod<T>,
    ) -> &mut Self
    where
        T: TestUnit + 'static,
        F: Fn(&mut TestContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory: TestFactory = Arc::new(move |ctx: &mut TestContext| {
            let unit = ctor(ctx)?;
            Ok(Box::new(BoundMethod { unit, method }) as Box<dyn TestInstance>)
        });
        self.tests.push(RegisteredTest {
            module: module.to_string(),
            cls_name: cls_name.to_string(),
            method_name: method_name.to_string(),
            factory,
            ignore: false,
        });
        self
    }

    /// Mark a registered test as ignored. Returns false when nothing matched.
    pub fn ignore(&mut self, module: &str, cls_name: &str, method_name: &str) -> bool {
        let mut matched = false;
        for test in &mut self.tests {
            if test.module == module && test.cls_name == cls_name && test.method_name == method_name
            {
                test.ignore = true;
                matched = true;
            }
        }
        matched
    }

    /// `module.Class.method` of every registered test.
    pub fn names(&self) -> Vec<String> {
        self.tests
            .iter()
            .map(|t| format!("{}.{}.{}", t.module, t.cls_name, t.method_name))
            .collect()
    }
}

impl TestLoader for TestRegistry {
    fn discover(&self, metadata: &TestMetadata) -> anyhow::Result<Vec<ResolvedTest>> {
        let module = metadata
            .file_name
            .strip_suffix(".rs")
            .unwrap_or(&metadata.file_name);
        debug!(directory = %metadata.directory, module, "discovering test");

        Ok(self
            .tests
            .iter()
            .filter(|t| t.module == module && t.cls_name == metadata.cls_name)
            .filter(|t| metadata.method_name.is_empty() || t.method_name == metadata.method_name)
            .map(|t| ResolvedTest {
                metadata: TestMetadata {
                    method_name: t.method_name.clone(),
                    ..metadata.clone()
                },
                factory: Arc::clone(&t.factory),
                ignore: t.ignore,
            })
            .collect())
    }
}
