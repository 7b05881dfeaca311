//! Aggregation of per-attempt summaries into the final summary text.
//!
//! Attempts that failed the same way are grouped under one header listing
//! their 1-based numbers; groups keep the order in which their summary first
//! appeared. Groups are separated by a divider of `~` as wide as the longest
//! line emitted so far.

use dtr_common::TestStatus;

const DIVIDER: char = '~';

/// Build the final summary lines.
///
/// `run_summaries[i]` is the summary of attempt `i + 1`; attempts that
/// produced no summary are absent. `total_runs` counts every attempt,
/// including the final passing one of a FLAKY test.
pub fn aggregate_run_summaries(
    run_summaries: &[Vec<String>],
    status: TestStatus,
    total_runs: usize,
    deflake_enabled: bool,
) -> Vec<String> {
    let Some(first) = run_summaries.first() else {
        return vec!["Test Passed".to_string()];
    };
    if !deflake_enabled {
        return first.clone();
    }

    let mut groups: Vec<(&[String], Vec<usize>)> = Vec::new();
    for (idx, summary) in run_summaries.iter().enumerate() {
        match groups.iter_mut().find(|(lines, _)| *lines == summary.as_slice()) {
            Some((_, runs)) => runs.push(idx + 1),
            None => groups.push((summary.as_slice(), vec![idx + 1])),
        }
    }

    let mut sub_summaries: Vec<Vec<String>> = groups
        .into_iter()
        .map(|(lines, runs)| {
            let header = format!(
                "run{} {} summary:",
                if runs.len() > 1 { "s" } else { "" },
                runs.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::iter::once(header).chain(lines.iter().cloned()).collect()
        })
        .collect();
    if status == TestStatus::Flaky {
        sub_summaries.push(vec![format!("run {total_runs}: PASSED")]);
    }

    let mut final_summary = Vec::new();
    let mut widest = 0;
    let last = sub_summaries.len().saturating_sub(1);
    for (position, sub_summary) in sub_summaries.into_iter().enumerate() {
        for line in sub_summary {
            widest = widest.max(line.chars().count());
            final_summary.push(line);
        }
        if position < last {
            final_summary.push(DIVIDER.to_string().repeat(widest));
        }
    }
    final_summary
}
