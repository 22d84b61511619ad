//! Text summary builder for CLI output.
//!
//! Formats a finished report as human-readable lines for text mode.

use crate::model::Report;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished report.
pub(crate) fn build_text_summary(report: &Report) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Report: {}", report.id));

    let rate = if report.total_tests > 0 {
        report.passed as f64 / report.total_tests as f64 * 100.0
    } else {
        0.0
    };
    lines.push(format!(
        "Tests: {} total, {} passed, {} failed ({rate:.0}% pass rate)",
        report.total_tests, report.passed, report.failed
    ));

    for case in &report.results {
        let mut line = format!("  [{}] {}", case.status.to_uppercase(), case.name);
        if let Some(ms) = case.duration_ms {
            line.push_str(&format!(" ({ms} ms)"));
        }
        if let Some(error) = case.error.as_deref() {
            line.push_str(&format!(": {error}"));
        }
        lines.push(line);
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CaseResult;

    #[test]
    fn test_summary_carries_totals_and_cases() {
        let report = Report {
            id: "r-1".to_string(),
            passed: 8,
            failed: 2,
            total_tests: 10,
            results: vec![
                CaseResult {
                    name: "Add to cart".to_string(),
                    status: "passed".to_string(),
                    duration_ms: Some(1200),
                    error: None,
                },
                CaseResult {
                    name: "Pay by card".to_string(),
                    status: "failed".to_string(),
                    duration_ms: None,
                    error: Some("button not found".to_string()),
                },
            ],
        };

        let summary = build_text_summary(&report);
        assert_eq!(summary.lines[0], "Report: r-1");
        assert_eq!(
            summary.lines[1],
            "Tests: 10 total, 8 passed, 2 failed (80% pass rate)"
        );
        assert_eq!(summary.lines[2], "  [PASSED] Add to cart (1200 ms)");
        assert_eq!(
            summary.lines[3],
            "  [FAILED] Pay by card: button not found"
        );
    }

    #[test]
    fn test_empty_report_avoids_division_by_zero() {
        let summary = build_text_summary(&Report::default());
        assert!(summary.lines[1].contains("(0% pass rate)"));
    }
}
