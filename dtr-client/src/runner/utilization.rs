//! Cluster-utilization policy applied to the final status.

use dtr_common::{ClusterDescriptor, LogLevel, TestStatus};

/// Outcome of the utilization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilizationVerdict {
    pub status: TestStatus,
    /// Line to append to the final summary.
    pub summary_line: Option<String>,
    /// Line to log.
    pub log: Option<(LogLevel, String)>,
}

/// Compare the peak node usage against the allotment.
///
/// Under-use only warns unless `strict` is set; in strict mode the status
/// becomes FAIL and the finding is added to the summary.
pub fn check_cluster_utilization(
    status: TestStatus,
    cluster: &ClusterDescriptor,
    strict: bool,
) -> UtilizationVerdict {
    let max_used = cluster.max_used();
    let total = cluster.total();
    if max_used >= total {
        return UtilizationVerdict {
            status,
            summary_line: None,
            log: None,
        };
    }

    let message = format!("Test requested {total} nodes, used only {max_used}");
    if strict {
        UtilizationVerdict {
            status: TestStatus::Fail,
            log: status
                .is_success()
                .then(|| (LogLevel::Info, format!("FAIL: {message}"))),
            summary_line: Some(message),
        }
    } else {
        UtilizationVerdict {
            status,
            summary_line: None,
            log: Some((LogLevel::Warn, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtr_common::NodeSpec;

    fn cluster(total: usize, used: usize) -> ClusterDescriptor {
        let mut cluster =
            ClusterDescriptor::new((0..total).map(|i| NodeSpec::new(format!("worker{i}"))).collect());
        let leased = cluster.alloc(used).unwrap();
        cluster.free(&leased).unwrap();
        cluster
    }

    #[test]
    fn test_full_use_is_untouched() {
        let verdict = check_cluster_utilization(TestStatus::Pass, &cluster(2, 2), true);
        assert_eq!(verdict.status, TestStatus::Pass);
        assert!(verdict.summary_line.is_none());
        assert!(verdict.log.is_none());
    }

    #[test]
    fn test_strict_downgrades_pass() {
        let verdict = check_cluster_utilization(TestStatus::Pass, &cluster(4, 2), true);
        assert_eq!(verdict.status, TestStatus::Fail);
        assert_eq!(
            verdict.summary_line.as_deref(),
            Some("Test requested 4 nodes, used only 2")
        );
        assert_eq!(
            verdict.log,
            Some((LogLevel::Info, "FAIL: Test requested 4 nodes, used only 2".into()))
        );
    }

    #[test]
    fn test_strict_on_failed_test_only_adds_line() {
        let verdict = check_cluster_utilization(TestStatus::Fail, &cluster(3, 1), true);
        assert_eq!(verdict.status, TestStatus::Fail);
        assert!(verdict.summary_line.is_some());
        assert!(verdict.log.is_none());
    }

    #[test]
    fn test_lenient_only_warns() {
        let verdict = check_cluster_utilization(TestStatus::Flaky, &cluster(4, 2), false);
        assert_eq!(verdict.status, TestStatus::Flaky);
        assert!(verdict.summary_line.is_none());
        assert!(matches!(verdict.log, Some((LogLevel::Warn, _))));
    }
}
