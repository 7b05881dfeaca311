//! Tests compiled into the `dtr-client` binary.
//!
//! They let a driver check a worker's runner end to end without shipping any
//! test code: `selftest.SelfCheck.test_noop` always passes,
//! `test_cluster` leases every allotted node, and `test_echo_args` returns
//! its injected arguments as artifact data.

use crate::test_unit::{TestContext, TestRegistry, TestUnit};
use anyhow::Context;
use dtr_common::NodeSpec;
use serde_json::{Value, json};

pub const MODULE: &str = "selftest";
pub const CLASS: &str = "SelfCheck";

#[derive(Debug, Default)]
pub struct SelfCheck {
    leased: Vec<NodeSpec>,
}

impl TestUnit for SelfCheck {
    fn free_nodes(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        ctx.cluster.free(&self.leased)?;
        self.leased.clear();
        Ok(())
    }
}

impl SelfCheck {
    fn test_noop(&mut self, _ctx: &mut TestContext) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    fn test_cluster(&mut self, ctx: &mut TestContext) -> anyhow::Result<Option<Value>> {
        let count = ctx.cluster.available();
        self.leased = ctx.cluster.alloc(count)?;
        let hosts: Vec<&str> = self.leased.iter().map(|n| n.hostname.as_str()).collect();

        let path = ctx.results_dir().join("nodes.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&hosts)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(Some(json!({ "nodes": hosts })))
    }

    fn test_echo_args(&mut self, ctx: &mut TestContext) -> anyhow::Result<Option<Value>> {
        Ok(ctx.injected_args().cloned())
    }
}

/// Registry of the built-in tests.
pub fn registry() -> TestRegistry {
    let mut registry = TestRegistry::new();
    registry
        .register(MODULE, CLASS, "test_noop", |_| Ok(SelfCheck::default()), SelfCheck::test_noop)
        .register(MODULE, CLASS, "test_cluster", |_| Ok(SelfCheck::default()), SelfCheck::test_cluster)
        .register(
            MODULE,
            CLASS,
            "test_echo_args",
            |_| Ok(SelfCheck::default()),
            SelfCheck::test_echo_args,
        );
    registry
}
