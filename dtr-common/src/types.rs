//! Common types used across runner components.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a test, or of one attempt of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// The test passed on its first attempt.
    Pass,
    /// Every attempt failed (or an attempt was interrupted).
    Fail,
    /// The test failed at least once and then passed on a later attempt.
    Flaky,
    /// The test was marked as ignored and never executed.
    Ignore,
}

impl TestStatus {
    /// Whether this status counts as a successful run.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Pass | Self::Flaky)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Flaky => write!(f, "FLAKY"),
            Self::Ignore => write!(f, "IGNORE"),
        }
    }
}

/// Global test-run settings handed down by the driver at handshake time.
///
/// The client keeps an immutable copy for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Identifier of the driver session this test belongs to.
    pub session_id: String,
    /// Root directory under which per-test results are written.
    pub results_dir: PathBuf,
    /// Skip stopping and cleaning services after each attempt (post-mortem mode).
    #[serde(default)]
    pub no_teardown: bool,
    /// Whether the session runs in debug mode.
    #[serde(default)]
    pub debug: bool,
    /// Free-form session globals forwarded to test units.
    #[serde(default)]
    pub globals: serde_json::Map<String, Value>,
}

/// Descriptor identifying which test unit to resolve locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetadata {
    /// Directory containing the test module.
    pub directory: String,
    /// Test module (file) name.
    pub file_name: String,
    /// Test class (suite) name.
    pub cls_name: String,
    /// Test method name.
    pub method_name: String,
    /// Arguments injected into a parametrized test.
    #[serde(default)]
    pub injected_args: Option<Value>,
}

impl TestMetadata {
    /// Dotted `module.Class.method` name without injected arguments.
    pub fn qualified_name(&self) -> String {
        let module = self
            .file_name
            .strip_suffix(".rs")
            .unwrap_or(&self.file_name);
        format!("{}.{}.{}", module, self.cls_name, self.method_name)
    }
}

impl std::fmt::Display for TestMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.directory, self.qualified_name())?;
        if let Some(args) = &self.injected_args {
            write!(f, " {args}")?;
        }
        Ok(())
    }
}

/// One compute node leased to a test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    #[serde(default = "default_os")]
    pub os: String,
}

fn default_os() -> String {
    "linux".to_string()
}

impl NodeSpec {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            os: default_os(),
        }
    }
}

/// Errors raised by node accounting on a [`ClusterDescriptor`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("requested {requested} nodes but only {available} of {total} are available")]
    InsufficientNodes {
        requested: usize,
        available: usize,
        total: usize,
    },

    #[error("node {0} is not leased by this test")]
    NotLeased(String),
}

/// The set of nodes allotted to one test, with usage accounting.
///
/// Services lease nodes from the descriptor while the test runs; the peak
/// number of concurrently leased nodes is what the cluster-utilization
/// policy compares against the allotment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    nodes: Vec<NodeSpec>,
    #[serde(default)]
    max_used: usize,
    #[serde(skip)]
    leased: Vec<bool>,
}

impl ClusterDescriptor {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        let leased = vec![false; nodes.len()];
        Self {
            nodes,
            max_used: 0,
            leased,
        }
    }

    /// Every node granted to the test.
    pub fn all(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Number of nodes granted to the test.
    pub fn total(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes currently leased.
    pub fn in_use(&self) -> usize {
        self.leased.iter().filter(|leased| **leased).count()
    }

    /// Peak number of nodes leased at the same time.
    pub fn max_used(&self) -> usize {
        self.max_used
    }

    /// Number of nodes that can still be leased.
    pub fn available(&self) -> usize {
        self.total() - self.in_use()
    }

    /// Lease `count` free nodes.
    pub fn alloc(&mut self, count: usize) -> Result<Vec<NodeSpec>, ClusterError> {
        self.leased.resize(self.nodes.len(), false);
        let available = self.available();
        if count > available {
            return Err(ClusterError::InsufficientNodes {
                requested: count,
                available,
                total: self.total(),
            });
        }

        let mut granted = Vec::with_capacity(count);
        for (node, leased) in self.nodes.iter().zip(self.leased.iter_mut()) {
            if granted.len() == count {
                break;
            }
            if !*leased {
                *leased = true;
                granted.push(node.clone());
            }
        }
        self.max_used = self.max_used.max(self.in_use());
        Ok(granted)
    }

    /// Return previously leased nodes to the pool.
    pub fn free(&mut self, nodes: &[NodeSpec]) -> Result<(), ClusterError> {
        self.leased.resize(self.nodes.len(), false);
        for node in nodes {
            let idx = self
                .nodes
                .iter()
                .zip(self.leased.iter())
                .position(|(candidate, leased)| *leased && candidate == node)
                .ok_or_else(|| ClusterError::NotLeased(node.hostname.clone()))?;
            self.leased[idx] = false;
        }
        Ok(())
    }
}

/// The final result of one test, built once per process and sent to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub test_index: u32,
    pub session_id: String,
    /// Dotted name of the resolved test.
    pub test_name: String,
    pub status: TestStatus,
    /// Aggregated, human-readable summary (lines joined by `\n`).
    pub summary: String,
    /// Artifact data returned by the test body, if any.
    #[serde(default)]
    pub data: Option<Value>,
    /// Unix timestamp (seconds) at which the reported run started.
    pub start_time: f64,
    /// Unix timestamp (seconds) at which the reported run stopped.
    pub stop_time: f64,
    /// Ids of the services attached to the report.
    #[serde(default)]
    pub services: Vec<String>,
}

impl TestResult {
    /// Wall-clock duration of the reported run in seconds.
    pub fn run_time_secs(&self) -> f64 {
        (self.stop_time - self.start_time).max(0.0)
    }
}
