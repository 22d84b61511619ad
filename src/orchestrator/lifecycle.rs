//! Run lifecycle state, kept apart from IO.
//!
//! All transitions are synchronous methods on `RunLifecycle`; the
//! controller owns the only instance and is the single writer. Two
//! rules hold throughout: the first terminal outcome wins, and log
//! lines only land while a run is active.

use crate::model::{ExecutionRun, LogClass, LogLine, Report, RunPlan, RunState};
use thiserror::Error;

/// How a run ended. `Failed` carries no payload; the controller appends
/// the failure explanation to the log before finishing.
#[derive(Debug)]
pub(crate) enum RunOutcome {
    Completed(Box<Report>),
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq)]
pub(crate) enum LaunchRejected {
    #[error("no scenarios selected")]
    EmptySelection,
    #[error("a run cannot start from the {state:?} state")]
    NotSelecting { state: RunState },
}

#[derive(Debug, Default)]
pub(crate) struct RunLifecycle {
    state: RunState,
    run: Option<ExecutionRun>,
    report: Option<Report>,
    log: Vec<LogLine>,
}

impl RunLifecycle {
    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn run(&self) -> Option<&ExecutionRun> {
        self.run.as_ref()
    }

    pub(crate) fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn log(&self) -> &[LogLine] {
        &self.log
    }

    /// The catalog arrived; selection can begin. Only meaningful from
    /// `Idle`, reloading later does not disturb an ongoing run.
    pub(crate) fn catalog_ready(&mut self) -> bool {
        if self.state == RunState::Idle {
            self.state = RunState::Selecting;
            true
        } else {
            false
        }
    }

    /// Move into `Launching` with the given plan. Refused outside
    /// `Selecting` and for empty plans.
    pub(crate) fn begin_launch(&mut self, plan: RunPlan) -> Result<(), LaunchRejected> {
        if self.state != RunState::Selecting {
            return Err(LaunchRejected::NotSelecting { state: self.state });
        }
        if plan.scenario_names.is_empty() {
            return Err(LaunchRejected::EmptySelection);
        }
        self.run = Some(ExecutionRun {
            plan,
            report_id: None,
        });
        self.state = RunState::Launching;
        Ok(())
    }

    /// The service accepted the launch and assigned a report id.
    pub(crate) fn launch_accepted(&mut self, report_id: String) -> bool {
        if self.state != RunState::Launching {
            return false;
        }
        if let Some(run) = self.run.as_mut() {
            run.report_id = Some(report_id);
        }
        self.state = RunState::Running;
        true
    }

    /// Apply a terminal outcome. Returns the state entered, or `None`
    /// when the run already ended and the outcome is discarded.
    pub(crate) fn finish(&mut self, outcome: RunOutcome) -> Option<RunState> {
        if !self.state.is_active() {
            return None;
        }
        let entered = match outcome {
            RunOutcome::Completed(report) => {
                self.report = Some(*report);
                RunState::Completed
            }
            RunOutcome::Failed => RunState::Failed,
            RunOutcome::Cancelled => RunState::Cancelled,
        };
        self.state = entered;
        Some(entered)
    }

    /// Append a line to the run log. Lines arriving outside an active
    /// run are dropped.
    pub(crate) fn append_line(&mut self, text: impl Into<String>) -> Option<LogLine> {
        if !self.state.is_active() {
            return None;
        }
        let text = text.into();
        let line = LogLine {
            seq: self.log.len(),
            class: LogClass::classify(&text),
            text,
        };
        self.log.push(line.clone());
        Some(line)
    }

    /// The poller gave up without a report. The run stays `Running`;
    /// only a hint lands in the log.
    pub(crate) fn poll_timed_out(&mut self, attempts: u32) -> Option<LogLine> {
        if self.state != RunState::Running {
            return None;
        }
        self.append_line(format!(
            "No report after {attempts} attempts; still running remotely. Force-stop to end the run."
        ))
    }

    /// Clear the finished run and return to `Selecting`. Only allowed
    /// from a terminal state.
    pub(crate) fn reset(&mut self) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        self.run = None;
        self.report = None;
        self.log.clear();
        self.state = RunState::Selecting;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_plan() -> RunPlan {
        RunPlan {
            project_id: "p-1".to_string(),
            feature_id: "f-1".to_string(),
            feature_name: "Checkout".to_string(),
            scenario_names: vec!["Add to cart".to_string(), "Pay by card".to_string()],
            headless: true,
        }
    }

    fn running_lifecycle() -> RunLifecycle {
        let mut lc = RunLifecycle::default();
        lc.catalog_ready();
        lc.begin_launch(cart_plan()).unwrap();
        lc.launch_accepted("r-1".to_string());
        lc
    }

    #[test]
    fn test_catalog_unlocks_selection_once() {
        let mut lc = RunLifecycle::default();
        assert!(lc.catalog_ready());
        assert_eq!(lc.state(), RunState::Selecting);
        assert!(!lc.catalog_ready());
    }

    #[test]
    fn test_empty_launch_is_refused() {
        let mut lc = RunLifecycle::default();
        lc.catalog_ready();
        let mut plan = cart_plan();
        plan.scenario_names.clear();

        assert_eq!(lc.begin_launch(plan), Err(LaunchRejected::EmptySelection));
        assert_eq!(lc.state(), RunState::Selecting);
        assert!(lc.run().is_none());
    }

    #[test]
    fn test_launch_needs_selecting_state() {
        let mut lc = RunLifecycle::default();
        assert_eq!(
            lc.begin_launch(cart_plan()),
            Err(LaunchRejected::NotSelecting {
                state: RunState::Idle
            })
        );
    }

    #[test]
    fn test_accepted_launch_stores_report_id() {
        let mut lc = RunLifecycle::default();
        lc.catalog_ready();
        lc.begin_launch(cart_plan()).unwrap();
        assert_eq!(lc.state(), RunState::Launching);

        assert!(lc.launch_accepted("r-9".to_string()));
        assert_eq!(lc.state(), RunState::Running);
        assert_eq!(lc.run().unwrap().report_id.as_deref(), Some("r-9"));
    }

    #[test]
    fn test_inline_completion_skips_running() {
        // A synchronous server finishes the run inside the launch call.
        let mut lc = RunLifecycle::default();
        lc.catalog_ready();
        lc.begin_launch(cart_plan()).unwrap();

        let report = Report {
            id: "r-2".to_string(),
            passed: 8,
            failed: 2,
            total_tests: 10,
            ..Default::default()
        };
        assert_eq!(
            lc.finish(RunOutcome::Completed(Box::new(report))),
            Some(RunState::Completed)
        );
        assert_eq!(lc.report().unwrap().total_tests, 10);
    }

    #[test]
    fn test_first_terminal_outcome_wins() {
        let mut lc = running_lifecycle();
        assert_eq!(
            lc.finish(RunOutcome::Cancelled),
            Some(RunState::Cancelled)
        );

        // A report racing in after cancellation changes nothing.
        let late = Report::default();
        assert_eq!(lc.finish(RunOutcome::Completed(Box::new(late))), None);
        assert_eq!(lc.state(), RunState::Cancelled);
        assert!(lc.report().is_none());
    }

    #[test]
    fn test_lines_only_land_while_active() {
        let mut lc = RunLifecycle::default();
        assert!(lc.append_line("too early").is_none());

        let mut lc = running_lifecycle();
        for text in ["Scenario started", "[PASS] step 1", "[FAIL] step 2"] {
            lc.append_line(text);
        }
        let seqs: Vec<usize> = lc.log().iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(lc.log()[2].class, LogClass::Fail);

        lc.finish(RunOutcome::Cancelled);
        assert!(lc.append_line("too late").is_none());
        assert_eq!(lc.log().len(), 3);
    }

    #[test]
    fn test_poll_timeout_leaves_run_running() {
        let mut lc = running_lifecycle();
        let line = lc.poll_timed_out(120).unwrap();
        assert!(line.text.contains("120 attempts"));
        assert_eq!(lc.state(), RunState::Running);

        // Force-stop still works afterwards.
        assert_eq!(
            lc.finish(RunOutcome::Cancelled),
            Some(RunState::Cancelled)
        );
    }

    #[test]
    fn test_reset_only_from_terminal() {
        let mut lc = running_lifecycle();
        assert!(!lc.reset());

        lc.finish(RunOutcome::Failed);
        assert!(lc.reset());
        assert_eq!(lc.state(), RunState::Selecting);
        assert!(lc.run().is_none());
        assert!(lc.log().is_empty());
    }
}
