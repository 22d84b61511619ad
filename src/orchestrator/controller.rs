//! Run lifecycle controller.
//!
//! Owns launch/stop/reset orchestration and emits events for
//! presentation layers. Each accepted run gets a fresh signal channel
//! that wires its log feed, report poller, and stop acknowledgements
//! back into the loop; the channel is replaced on every launch so a
//! signal from an earlier run can never reach the current one.

use crate::api::{ApiClient, LaunchOutcome};
use crate::cancel::{StopAck, StopRequester};
use crate::livelog::LogFeed;
use crate::model::{RunEvent, RunPlan, RunState, SessionConfig};
use crate::orchestrator::lifecycle::{RunLifecycle, RunOutcome};
use crate::poller::{poll_report, PollOutcome, PollSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Commands emitted by UI layers to control the session.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    LoadCatalog,
    Launch(RunPlan),
    GracefulStop,
    ForcedStop,
    Reset,
    Quit,
}

/// Everything feeding back into the loop for one accepted run.
enum RunSignal {
    Line(String),
    Poll(PollOutcome),
    Stop(StopAck),
}

/// Internal handle for an accepted run's background tasks.
struct ActiveRun {
    feed: Option<LogFeed>,
    poll_cancel: CancellationToken,
    // Held so recv() on signal_rx cannot return None while the run is
    // active; also cloned out for stop acknowledgements.
    signal_tx: UnboundedSender<RunSignal>,
    signal_rx: UnboundedReceiver<RunSignal>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.poll_cancel.cancel();
        if let Some(feed) = &self.feed {
            feed.close();
        }
    }
}

/// Start the log feed and report poller for an accepted run.
fn open_run(api: &Arc<ApiClient>, report_id: &str, settings: PollSettings) -> ActiveRun {
    let (signal_tx, signal_rx) = tokio::sync::mpsc::unbounded_channel();

    // The feed is advisory; a bad URL costs the live view, not the run.
    let feed = match api.ws_logs_url() {
        Ok(url) => {
            let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
            let bridge_tx = signal_tx.clone();
            tokio::spawn(async move {
                while let Some(text) = line_rx.recv().await {
                    if bridge_tx.send(RunSignal::Line(text)).is_err() {
                        break;
                    }
                }
            });
            let token = api.bearer_token().map(str::to_string);
            Some(LogFeed::open(url, token, line_tx))
        }
        Err(e) => {
            warn!("live log feed unavailable: {e}");
            None
        }
    };

    let poll_cancel = CancellationToken::new();
    let poll_api = api.clone();
    let poll_token = poll_cancel.clone();
    let poll_tx = signal_tx.clone();
    let report_id = report_id.to_string();
    tokio::spawn(async move {
        let fetch = || {
            let api = poll_api.clone();
            let id = report_id.clone();
            async move { api.fetch_report(&id).await }
        };
        if let Some(outcome) = poll_report(fetch, settings, poll_token).await {
            let _ = poll_tx.send(RunSignal::Poll(outcome));
        }
    });

    ActiveRun {
        feed,
        poll_cancel,
        signal_tx,
        signal_rx,
    }
}

/// Orchestrate runs based on UI commands and emit events back to
/// presentation layers.
pub(crate) async fn run_controller(
    cfg: &SessionConfig,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let api = Arc::new(ApiClient::new(cfg).context("failed to build the HTTP client")?);
    let stop = StopRequester::new(api.clone());
    let poll_settings = PollSettings {
        interval: cfg.poll_interval,
        max_attempts: cfg.poll_max_attempts,
    };
    let mut lifecycle = RunLifecycle::default();
    let mut active: Option<ActiveRun> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(UiCommand::LoadCatalog) => {
                    load_catalog(&api, &cfg.project_id, &mut lifecycle, &event_tx).await;
                }
                Some(UiCommand::Launch(plan)) => {
                    launch(&api, poll_settings, &mut lifecycle, &mut active, &event_tx, plan)
                        .await;
                }
                Some(UiCommand::GracefulStop) => {
                    if let (RunState::Running, Some(run)) = (lifecycle.state(), active.as_ref()) {
                        let stopper = stop.clone();
                        let ack_tx = run.signal_tx.clone();
                        tokio::spawn(async move {
                            let ack = stopper.request_graceful().await;
                            let _ = ack_tx.send(RunSignal::Stop(ack));
                        });
                        let _ = event_tx.send(RunEvent::Info("Requested graceful stop…".into()));
                    } else {
                        let _ = event_tx.send(RunEvent::Info("No running test to stop.".into()));
                    }
                }
                Some(UiCommand::ForcedStop) => {
                    if lifecycle.state().is_active() {
                        // Local state flips first; the server request
                        // cannot change the outcome either way.
                        let text = match lifecycle.run() {
                            Some(run) => format!(
                                "Forced stop; cancelling {} locally.",
                                run.plan.feature_name
                            ),
                            None => "Forced stop; run cancelled locally.".to_string(),
                        };
                        emit_line(&mut lifecycle, &event_tx, text);
                        finish(&mut lifecycle, &mut active, &event_tx, RunOutcome::Cancelled);
                        stop.request_forced();
                    } else {
                        let _ = event_tx.send(RunEvent::Info("No active test to stop.".into()));
                    }
                }
                Some(UiCommand::Reset) => {
                    if lifecycle.reset() {
                        let _ = event_tx.send(RunEvent::StateChanged(RunState::Selecting));
                    }
                }
                Some(UiCommand::Quit) | None => break,
            },
            signal = async {
                match active.as_mut() {
                    Some(run) => run.signal_rx.recv().await,
                    None => futures::future::pending().await,
                }
            } => match signal {
                Some(signal) => handle_signal(&mut lifecycle, &mut active, &event_tx, signal),
                // Unreachable while ActiveRun holds its own sender.
                None => active = None,
            },
        }
    }

    Ok(())
}

async fn load_catalog(
    api: &ApiClient,
    project_id: &str,
    lifecycle: &mut RunLifecycle,
    event_tx: &UnboundedSender<RunEvent>,
) {
    // Catalog errors degrade to an empty list; the session stays usable.
    let features = match api.fetch_features(project_id).await {
        Ok(features) => features,
        Err(e) => {
            warn!("feature catalog unavailable: {e}");
            Vec::new()
        }
    };
    let suites = match api.fetch_suites(project_id).await {
        Ok(suites) => suites,
        Err(e) => {
            warn!("suite catalog unavailable: {e}");
            Vec::new()
        }
    };

    let prompt = features.is_empty();
    let _ = event_tx.send(RunEvent::CatalogLoaded { features, suites });
    if prompt {
        let _ = event_tx.send(RunEvent::Info(
            "No feature files found. Generate tests for this project first.".into(),
        ));
    }
    if lifecycle.catalog_ready() {
        let _ = event_tx.send(RunEvent::StateChanged(RunState::Selecting));
    }
}

async fn launch(
    api: &Arc<ApiClient>,
    settings: PollSettings,
    lifecycle: &mut RunLifecycle,
    active: &mut Option<ActiveRun>,
    event_tx: &UnboundedSender<RunEvent>,
    plan: RunPlan,
) {
    if let Err(reject) = lifecycle.begin_launch(plan.clone()) {
        let _ = event_tx.send(RunEvent::Info(format!("Launch refused: {reject}")));
        return;
    }
    let _ = event_tx.send(RunEvent::StateChanged(RunState::Launching));
    emit_line(
        lifecycle,
        event_tx,
        format!(
            "Launching {} scenario(s) from {}",
            plan.scenario_names.len(),
            plan.feature_name
        ),
    );

    match api.launch_run(&plan).await {
        Ok(LaunchOutcome::Accepted { report_id }) => {
            lifecycle.launch_accepted(report_id.clone());
            emit_line(lifecycle, event_tx, format!("Run accepted; report {report_id}"));
            let _ = event_tx.send(RunEvent::RunAccepted {
                report_id: report_id.clone(),
            });
            let _ = event_tx.send(RunEvent::StateChanged(RunState::Running));
            *active = Some(open_run(api, &report_id, settings));
        }
        Ok(LaunchOutcome::Finished(report)) => {
            emit_line(lifecycle, event_tx, "Run finished during launch; report ready.");
            finish(lifecycle, active, event_tx, RunOutcome::Completed(report));
        }
        Err(e) => {
            emit_line(lifecycle, event_tx, format!("Launch failed: {e}"));
            finish(lifecycle, active, event_tx, RunOutcome::Failed);
        }
    }
}

fn handle_signal(
    lifecycle: &mut RunLifecycle,
    active: &mut Option<ActiveRun>,
    event_tx: &UnboundedSender<RunEvent>,
    signal: RunSignal,
) {
    match signal {
        RunSignal::Line(text) => emit_line(lifecycle, event_tx, text),
        RunSignal::Poll(PollOutcome::Completed(report)) => {
            finish(lifecycle, active, event_tx, RunOutcome::Completed(report));
        }
        RunSignal::Poll(PollOutcome::TimedOut { attempts }) => {
            if let Some(line) = lifecycle.poll_timed_out(attempts) {
                let _ = event_tx.send(RunEvent::LogLine(line));
            }
            let hint = match lifecycle.run().and_then(|run| run.report_id.as_deref()) {
                Some(id) => format!("Report {id} never arrived; force-stop to end the run."),
                None => "Report polling gave up; force-stop to end the run.".to_string(),
            };
            let _ = event_tx.send(RunEvent::Info(hint));
        }
        RunSignal::Stop(StopAck::Accepted { message }) => emit_line(lifecycle, event_tx, message),
        RunSignal::Stop(StopAck::Failed { error }) => {
            emit_line(lifecycle, event_tx, format!("Stop request failed: {error}"));
        }
    }
}

/// Append a log line and mirror it to the event stream. Dropped if no
/// run is active.
fn emit_line(
    lifecycle: &mut RunLifecycle,
    event_tx: &UnboundedSender<RunEvent>,
    text: impl Into<String>,
) {
    if let Some(line) = lifecycle.append_line(text) {
        let _ = event_tx.send(RunEvent::LogLine(line));
    }
}

/// Apply a terminal outcome and tear down the run's background tasks.
/// The report, when there is one, goes out before the state change.
fn finish(
    lifecycle: &mut RunLifecycle,
    active: &mut Option<ActiveRun>,
    event_tx: &UnboundedSender<RunEvent>,
    outcome: RunOutcome,
) {
    let Some(entered) = lifecycle.finish(outcome) else {
        return;
    };
    *active = None;
    if let Some(report) = lifecycle.report() {
        let _ = event_tx.send(RunEvent::ReportReady {
            report: Box::new(report.clone()),
        });
    }
    let _ = event_tx.send(RunEvent::StateChanged(entered));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Report;
    use std::time::Duration;

    fn offline_config() -> SessionConfig {
        SessionConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            token: None,
            project_id: "p-1".to_string(),
            headless: true,
            poll_interval: Duration::from_secs(2),
            poll_max_attempts: 120,
            user_agent: "gherkin-run-cli/test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_quit_ends_the_controller() {
        let (event_tx, _event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        let controller =
            tokio::spawn(async move { run_controller(&offline_config(), event_tx, cmd_rx).await });

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_launch_refused_before_catalog() {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        let controller =
            tokio::spawn(async move { run_controller(&offline_config(), event_tx, cmd_rx).await });

        let plan = RunPlan {
            project_id: "p-1".to_string(),
            feature_id: "f-1".to_string(),
            feature_name: "Checkout".to_string(),
            scenario_names: vec!["Add to cart".to_string()],
            headless: true,
        };
        cmd_tx.send(UiCommand::Launch(plan)).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();

        let mut saw_refusal = false;
        while let Some(event) = event_rx.recv().await {
            match event {
                RunEvent::Info(text) => saw_refusal |= text.contains("Launch refused"),
                RunEvent::StateChanged(state) => panic!("unexpected state change to {state:?}"),
                _ => {}
            }
        }
        assert!(saw_refusal);
    }

    #[test]
    fn test_forced_stop_wins_over_late_poll_result() {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut lifecycle = RunLifecycle::default();
        lifecycle.catalog_ready();
        lifecycle
            .begin_launch(RunPlan {
                project_id: "p-1".to_string(),
                feature_id: "f-1".to_string(),
                feature_name: "Checkout".to_string(),
                scenario_names: vec!["Add to cart".to_string()],
                headless: true,
            })
            .unwrap();
        lifecycle.launch_accepted("r-1".to_string());

        let poll_cancel = CancellationToken::new();
        let mut active = Some(ActiveRun {
            feed: None,
            poll_cancel: poll_cancel.clone(),
            signal_tx,
            signal_rx,
        });

        emit_line(
            &mut lifecycle,
            &event_tx,
            "Forced stop; cancelling Checkout locally.",
        );
        finish(&mut lifecycle, &mut active, &event_tx, RunOutcome::Cancelled);

        assert_eq!(lifecycle.state(), RunState::Cancelled);
        assert!(active.is_none());
        assert!(poll_cancel.is_cancelled());

        // A poll result that was already in flight when the user forced
        // the stop must not resurrect the run.
        let late = Report {
            id: "r-1".to_string(),
            passed: 8,
            ..Default::default()
        };
        handle_signal(
            &mut lifecycle,
            &mut active,
            &event_tx,
            RunSignal::Poll(PollOutcome::Completed(Box::new(late))),
        );
        assert_eq!(lifecycle.state(), RunState::Cancelled);
        assert!(lifecycle.report().is_none());

        handle_signal(
            &mut lifecycle,
            &mut active,
            &event_tx,
            RunSignal::Line("[PASS] step 9".into()),
        );

        let mut states = Vec::new();
        let mut report_events = 0;
        let mut lines = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            match event {
                RunEvent::StateChanged(state) => states.push(state),
                RunEvent::ReportReady { .. } => report_events += 1,
                RunEvent::LogLine(line) => lines.push(line.text),
                _ => {}
            }
        }
        assert_eq!(states, vec![RunState::Cancelled]);
        assert_eq!(report_events, 0);
        assert_eq!(
            lines,
            vec!["Forced stop; cancelling Checkout locally.".to_string()]
        );
    }
}
