use crate::api::ApiClient;
use crate::export::{export_json, ReportDocument};
use crate::model::{Feature, Report, RunEvent, RunPlan, RunState, SessionConfig};
use crate::orchestrator::{run_controller, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "gherkin-run-cli",
    version,
    about = "Launch and track Gherkin test runs from the terminal"
)]
pub struct Cli {
    /// Base URL of the test-automation service
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// Bearer token for the service API
    #[arg(long, env = "GHERKIN_RUN_TOKEN")]
    pub token: Option<String>,

    /// Project whose features are listed and launched
    #[arg(long)]
    pub project: String,

    /// Print the feature catalog and exit (no TUI)
    #[arg(long)]
    pub list: bool,

    /// Run one feature, print the report as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Run one feature, print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Feature to run in --json/--text mode (id or name)
    #[arg(long)]
    pub feature: Option<String>,

    /// Scenario to run, by name or id (repeatable). All scenarios when omitted
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,

    /// Use --headless true or --headless false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    /// Report poll interval
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Report poll attempt budget
    #[arg(long, default_value_t = 120)]
    pub poll_attempts: u32,

    /// Export the final report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

/// Initialize logging. A log file wins when given; without one, TUI
/// mode stays silent so log lines cannot corrupt the display.
pub fn init_logging(args: &Cli, tui: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match args.log_file.as_deref() {
        Some(path) => {
            if let Ok(file) = std::fs::File::create(path) {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .init();
            }
        }
        None if tui => {}
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.list {
        return run_list(args).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_headless(args).await;
        }
    }

    run_headless(args).await
}

/// Build a `SessionConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SessionConfig {
    SessionConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        token: args.token.clone(),
        project_id: args.project.clone(),
        headless: args.headless,
        poll_interval: Duration::from(args.poll_interval),
        poll_max_attempts: args.poll_attempts,
        user_agent: format!("gherkin-run-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Print the project's feature catalog and exit.
async fn run_list(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let api = ApiClient::new(&cfg).context("failed to build the HTTP client")?;
    let (out_tx, out_handle) = spawn_output_writer();

    let features = api
        .fetch_features(&cfg.project_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("feature catalog unavailable: {e}");
            Vec::new()
        });
    let suites = api.fetch_suites(&cfg.project_id).await.unwrap_or_else(|e| {
        tracing::warn!("suite catalog unavailable: {e}");
        Vec::new()
    });

    if features.is_empty() {
        let _ = out_tx.send(OutputLine::Stdout(
            "No feature files found. Generate tests for this project first.".to_string(),
        ));
    } else {
        for feature in &features {
            let _ = out_tx.send(OutputLine::Stdout(format!(
                "{} ({} scenarios)",
                feature.name,
                feature.scenarios.len()
            )));
            for scenario in &feature.scenarios {
                let _ = out_tx.send(OutputLine::Stdout(format!(
                    "  - {} [{} steps]",
                    scenario.name, scenario.step_count
                )));
            }
        }
    }
    if !suites.is_empty() {
        let _ = out_tx.send(OutputLine::Stdout(String::new()));
        let _ = out_tx.send(OutputLine::Stdout(format!(
            "Traditional suites ({}, not launchable here):",
            suites.len()
        )));
        for suite in &suites {
            let _ = out_tx.send(OutputLine::Stdout(format!("  - {}", suite.name)));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Run one feature without the TUI, driven entirely by controller
/// events. Log lines and progress go to stderr; the report to stdout.
async fn run_headless(args: Cli) -> Result<()> {
    let feature_query = args
        .feature
        .clone()
        .context("--feature is required without the TUI; pick one from --list")?;
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let controller_cfg = cfg.clone();
    let controller =
        tokio::spawn(async move { run_controller(&controller_cfg, event_tx, cmd_rx).await });
    let _ = cmd_tx.send(UiCommand::LoadCatalog);

    let mut launched = false;
    let mut launch_error: Option<anyhow::Error> = None;
    let mut plan_used: Option<RunPlan> = None;
    let mut report: Option<Report> = None;
    let mut final_state = RunState::Idle;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = out_tx.send(OutputLine::Stderr("Interrupted; forcing stop.".to_string()));
                let _ = cmd_tx.send(UiCommand::ForcedStop);
                let _ = cmd_tx.send(UiCommand::Quit);
            }
            event = event_rx.recv() => match event {
                Some(RunEvent::CatalogLoaded { features, .. }) => {
                    if !launched {
                        launched = true;
                        match plan_from_catalog(&cfg, &args, &feature_query, &features) {
                            Ok(plan) => {
                                plan_used = Some(plan.clone());
                                let _ = cmd_tx.send(UiCommand::Launch(plan));
                            }
                            Err(e) => {
                                launch_error = Some(e);
                                let _ = cmd_tx.send(UiCommand::Quit);
                            }
                        }
                    }
                }
                Some(RunEvent::LogLine(line)) => {
                    let _ = out_tx.send(OutputLine::Stderr(line.text));
                }
                Some(RunEvent::Info(text)) => {
                    let _ = out_tx.send(OutputLine::Stderr(text));
                }
                Some(RunEvent::RunAccepted { .. }) => {}
                Some(RunEvent::ReportReady { report: r }) => report = Some(*r),
                Some(RunEvent::StateChanged(state)) => {
                    if state.is_terminal() {
                        final_state = state;
                        let _ = cmd_tx.send(UiCommand::Quit);
                    }
                }
                None => break,
            }
        }
    }

    controller.await.context("controller task failed")??;
    if let Some(e) = launch_error {
        drop(out_tx);
        let _ = out_handle.await;
        return Err(e);
    }

    if let Some(report) = report.as_ref() {
        if let (Some(path), Some(plan)) = (args.export_json.as_deref(), plan_used.as_ref()) {
            let doc = ReportDocument::new(plan, report);
            export_json(path, &doc)?;
            let _ = out_tx.send(OutputLine::Stderr(format!("Exported: {}", path.display())));
        }
        if args.json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(report)?));
        } else {
            for line in crate::text_summary::build_text_summary(report).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    } else {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "No report produced; run ended {final_state:?}."
        )));
    }

    drop(out_tx);
    let _ = out_handle.await;

    match (final_state, report) {
        (RunState::Completed, Some(r)) if r.succeeded() => Ok(()),
        (RunState::Completed, _) => Err(anyhow::anyhow!("run completed with failing tests")),
        (state, _) => Err(anyhow::anyhow!("run ended in the {state:?} state")),
    }
}

/// Resolve the requested feature and scenarios against the catalog.
/// Scenario names keep the feature's declared order.
fn plan_from_catalog(
    cfg: &SessionConfig,
    args: &Cli,
    feature_query: &str,
    features: &[Feature],
) -> Result<RunPlan> {
    let feature = features
        .iter()
        .find(|f| f.id == feature_query || f.name.eq_ignore_ascii_case(feature_query))
        .with_context(|| format!("feature {feature_query:?} not found; try --list"))?;

    let scenario_names: Vec<String> = if args.scenarios.is_empty() {
        feature.scenarios.iter().map(|s| s.name.clone()).collect()
    } else {
        for wanted in &args.scenarios {
            let known = feature.scenarios.iter().any(|s| {
                s.name.eq_ignore_ascii_case(wanted) || s.id.as_deref() == Some(wanted.as_str())
            });
            if !known {
                anyhow::bail!(
                    "scenario {wanted:?} not found in feature {:?}",
                    feature.name
                );
            }
        }
        feature
            .scenarios
            .iter()
            .filter(|s| {
                args.scenarios
                    .iter()
                    .any(|w| s.name.eq_ignore_ascii_case(w) || s.id.as_deref() == Some(w.as_str()))
            })
            .map(|s| s.name.clone())
            .collect()
    };
    if scenario_names.is_empty() {
        anyhow::bail!("feature {:?} has no scenarios to run", feature.name);
    }

    Ok(RunPlan {
        project_id: cfg.project_id.clone(),
        feature_id: feature.id.clone(),
        feature_name: feature.name.clone(),
        scenario_names,
        headless: cfg.headless,
    })
}
