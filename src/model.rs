use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session-wide settings resolved from CLI arguments.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub project_id: String,
    pub headless: bool,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub user_agent: String,
}

/// A Gherkin feature file as listed by the service catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// One scenario inside a feature. Scenario ids are optional on the
/// wire; selection derives a stable key when they are missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, alias = "stepCount")]
    pub step_count: u32,
}

/// A traditional (non-Gherkin) test suite. Listed alongside features
/// for orientation; these are not launchable from this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub id: String,
    pub name: String,
}

/// Run phases. Doubles as the status of the current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Selecting,
    Launching,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    /// A run is in flight: launch request sent or accepted.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Launching | RunState::Running)
    }
}

/// Everything the launch request needs. Scenario names are kept in the
/// feature's declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub project_id: String,
    pub feature_id: String,
    pub feature_name: String,
    pub scenario_names: Vec<String>,
    pub headless: bool,
}

/// The run currently tracked by the lifecycle, with the report id the
/// service assigned once the launch was accepted.
#[derive(Debug, Clone)]
pub struct ExecutionRun {
    pub plan: RunPlan,
    pub report_id: Option<String>,
}

/// Display class of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogClass {
    Pass,
    Fail,
    Info,
}

impl LogClass {
    /// Classify a raw log line by case-insensitive keyword search.
    /// Failure markers win when a line carries both kinds.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("fail") || lower.contains("error") {
            LogClass::Fail
        } else if lower.contains("pass")
            || lower.contains("success")
            || lower.contains("completed")
        {
            LogClass::Pass
        } else {
            LogClass::Info
        }
    }
}

/// One line of the run log. `seq` is the position in the append-only
/// log at the time the line landed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: usize,
    pub text: String,
    pub class: LogClass,
}

/// Final report for a finished run. Immutable once fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, alias = "report_id")]
    pub id: String,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default, alias = "totalTests", alias = "total")]
    pub total_tests: u32,
    #[serde(default, alias = "perTestResults", alias = "per_test_results")]
    pub results: Vec<CaseResult>,
}

impl Report {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Per-scenario outcome inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "durationMs")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    CatalogLoaded {
        features: Vec<Feature>,
        suites: Vec<Suite>,
    },
    StateChanged(RunState),
    RunAccepted {
        report_id: String,
    },
    LogLine(LogLine),
    ReportReady {
        // Box to keep RunEvent size small; Report carries per-case results.
        report: Box<Report>,
    },
    Info(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_spots_failure_markers() {
        assert_eq!(
            LogClass::classify("[FAIL] step 3 - element not found"),
            LogClass::Fail
        );
        assert_eq!(LogClass::classify("Error: timeout"), LogClass::Fail);
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(LogClass::classify("scenario PASSED"), LogClass::Pass);
        assert_eq!(LogClass::classify("FaIlEd assertion"), LogClass::Fail);
    }

    #[test]
    fn classify_prefers_failure_over_pass() {
        // A summary line can carry both markers; it must read as a failure.
        assert_eq!(
            LogClass::classify("2 passed, 1 failed"),
            LogClass::Fail
        );
    }

    #[test]
    fn classify_defaults_to_info() {
        assert_eq!(LogClass::classify("Scenario started"), LogClass::Info);
        assert_eq!(LogClass::classify(""), LogClass::Info);
    }

    #[test]
    fn report_tolerates_missing_fields() {
        let report: Report = serde_json::from_str(r#"{"report_id": "r-1"}"#).unwrap();
        assert_eq!(report.id, "r-1");
        assert_eq!(report.total_tests, 0);
        assert!(report.results.is_empty());
        assert!(report.succeeded());
    }

    #[test]
    fn report_accepts_camel_case_totals() {
        let report: Report = serde_json::from_str(
            r#"{"id": "r-2", "passed": 8, "failed": 2, "totalTests": 10,
                "results": [{"name": "Checkout", "status": "passed", "durationMs": 1200}]}"#,
        )
        .unwrap();
        assert_eq!(report.total_tests, 10);
        assert_eq!(report.results[0].duration_ms, Some(1200));
        assert!(!report.succeeded());
    }

    #[test]
    fn report_accepts_per_test_results_alias() {
        let report: Report = serde_json::from_str(
            r#"{"id": "r-9", "passed": 8, "failed": 2, "totalTests": 10,
                "perTestResults": [{"name": "Checkout", "status": "failed"}]}"#,
        )
        .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].status, "failed");
        assert_eq!(report.results[0].name, "Checkout");
    }

    #[test]
    fn scenario_accepts_camel_case_step_count() {
        let sc: Scenario =
            serde_json::from_str(r#"{"name": "Add to cart", "stepCount": 4}"#).unwrap();
        assert_eq!(sc.step_count, 4);
        assert!(sc.id.is_none());
    }

    #[test]
    fn run_state_predicates() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Launching.is_active());
        assert!(!RunState::Selecting.is_active());
    }
}
