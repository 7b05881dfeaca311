//! Local reporting of the final test result.

use anyhow::Context;
use dtr_common::TestResult;
use std::path::Path;
use tracing::info;

/// File written into the test's results directory.
pub const REPORT_FILE: &str = "report.json";

/// Records a final result locally before it is sent to the driver.
pub trait ResultReporter: Send + Sync {
    fn report(&self, result: &TestResult, results_dir: &Path) -> anyhow::Result<()>;
}

/// Writes the result as pretty-printed JSON to `<results dir>/report.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileReporter;

impl ResultReporter for JsonFileReporter {
    fn report(&self, result: &TestResult, results_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(results_dir)
            .with_context(|| format!("failed to create {}", results_dir.display()))?;
        let path = results_dir.join(REPORT_FILE);
        let json = serde_json::to_vec_pretty(result).context("failed to serialize test result")?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;

        info!(
            test = %result.test_name,
            status = %result.status,
            run_time_secs = result.run_time_secs(),
            report = %path.display(),
            "test result recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtr_common::TestStatus;

    #[test]
    fn test_writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("suite.Class.test").join("1");
        let result = TestResult {
            test_id: "t-1".into(),
            test_index: 1,
            session_id: "s-1".into(),
            test_name: "suite.Class.test".into(),
            status: TestStatus::Flaky,
            summary: "runs 1 summary:\nA".into(),
            data: None,
            start_time: 10.0,
            stop_time: 12.5,
            services: vec!["zk-2-1".into()],
        };

        JsonFileReporter.report(&result, &results_dir).unwrap();

        let written: TestResult =
            serde_json::from_slice(&std::fs::read(results_dir.join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(written, result);
    }
}
