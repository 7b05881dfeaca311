//! Services provisioned by test units and the registries that track them.
//!
//! A test unit registers each service it starts with the attempt's
//! [`ServiceRegistry`] and keeps the returned [`ServiceHandle`] to drive it.
//! The controller stops and cleans registered services during teardown and
//! copies every attempt's entries into a cumulative registry. Registries are
//! append-only: entries are never removed or replaced.

use anyhow::anyhow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// A long-running process or resource started by a test.
pub trait Service: Send {
    /// Short name, used in service ids (e.g. `zookeeper`).
    fn name(&self) -> &str;

    fn stop(&mut self) -> anyhow::Result<()>;

    fn clean(&mut self) -> anyhow::Result<()>;

    /// Errors the service accumulated while running, if any.
    fn errors(&self) -> Option<String> {
        None
    }
}

/// How service ids are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceIdFactory {
    /// `<name>-<index>`
    #[default]
    SingleRun,
    /// `<name>-<run>-<index>`, distinct across deflake attempts.
    MultiRun { run: u32 },
}

impl ServiceIdFactory {
    pub fn for_run(run: u32, deflake_enabled: bool) -> Self {
        if deflake_enabled {
            Self::MultiRun { run }
        } else {
            Self::SingleRun
        }
    }

    pub fn service_id(&self, name: &str, index: usize) -> String {
        match self {
            Self::SingleRun => format!("{name}-{index}"),
            Self::MultiRun { run } => format!("{name}-{run}-{index}"),
        }
    }
}

/// Handle a test unit keeps to a registered service.
pub type ServiceHandle<S> = Arc<Mutex<S>>;

type SharedService = Arc<Mutex<dyn Service>>;

fn lock_service(service: &SharedService) -> MutexGuard<'_, dyn Service + 'static> {
    service
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One registered service.
#[derive(Clone)]
pub struct ServiceEntry {
    service: SharedService,
    name: String,
    /// 1-based position among services of the same name in its attempt.
    index: usize,
    id_factory: ServiceIdFactory,
}

impl ServiceEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_id(&self) -> String {
        self.id_factory.service_id(&self.name, self.index)
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        lock_service(&self.service).stop()
    }

    pub fn clean(&self) -> anyhow::Result<()> {
        lock_service(&self.service).clean()
    }

    pub fn errors(&self) -> Option<String> {
        lock_service(&self.service)
            .errors()
            .filter(|errors| !errors.trim().is_empty())
    }
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("id", &self.service_id())
            .finish()
    }
}

/// Ordered, append-only collection of services.
///
/// [`ServiceRegistry::share`] hands out another view of the same entries;
/// a registration through either view is visible through both.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: Arc<Mutex<Vec<ServiceEntry>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServiceEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Another handle on the same entries.
    pub fn share(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Register a freshly started service.
    pub fn register<S: Service + 'static>(&mut self, service: S) -> ServiceHandle<S> {
        let name = service.name().to_string();
        let handle = Arc::new(Mutex::new(service));
        let shared: SharedService = handle.clone();
        let mut entries = self.lock();
        let index = entries.iter().filter(|e| e.name == name).count() + 1;
        entries.push(ServiceEntry {
            service: shared,
            name,
            index,
            id_factory: ServiceIdFactory::default(),
        });
        handle
    }

    /// Append every entry of `other`.
    pub fn extend_from(&mut self, other: &ServiceRegistry) {
        let added = other.entries();
        self.lock().extend(added);
    }

    /// Set the id strategy of every entry.
    pub fn assign_id_factory(&mut self, id_factory: ServiceIdFactory) {
        for entry in self.lock().iter_mut() {
            entry.id_factory = id_factory;
        }
    }

    /// Snapshot of the entries in registration order.
    pub fn entries(&self) -> Vec<ServiceEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.lock().iter().map(ServiceEntry::service_id).collect()
    }

    /// Stop every service, most recently registered first.
    ///
    /// Every service is attempted; the failures are reported together.
    pub fn stop_all(&self) -> anyhow::Result<()> {
        self.for_each_reversed("stop", ServiceEntry::stop)
    }

    /// Clean every service, most recently registered first.
    pub fn clean_all(&self) -> anyhow::Result<()> {
        self.for_each_reversed("clean", ServiceEntry::clean)
    }

    fn for_each_reversed(
        &self,
        action: &str,
        op: impl Fn(&ServiceEntry) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for entry in self.entries().iter().rev() {
            let id = entry.service_id();
            debug!(service = %id, "{action} service");
            if let Err(err) = op(entry) {
                warn!(service = %id, error = %err, "failed to {action} service");
                failures.push(format!("{id}: {err:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "failed to {action} {} service(s): {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }

    /// Errors reported by the services, one `<id>: <errors>` block per service.
    pub fn errors(&self) -> String {
        self.entries()
            .iter()
            .filter_map(|entry| {
                entry
                    .errors()
                    .map(|errors| format!("{}: {}", entry.service_id(), errors))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
