use crate::cli::{build_config, Cli};
use crate::export;
use crate::model::{
    Feature, LogClass, LogLine, Report, RunEvent, RunPlan, RunState, SessionConfig, Suite,
};
use crate::orchestrator::{self, UiCommand};
use crate::selection::{ScenarioKey, SelectionState, TriState};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// One row of the selection tree: a feature heading or an indented
/// scenario beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogRow {
    Feature { index: usize },
    Scenario { feature: usize, ordinal: usize },
}

struct UiState {
    tab: usize,
    state: RunState,
    info: String,
    features: Vec<Feature>,
    suites: Vec<Suite>,
    selection: SelectionState,
    cursor: usize,
    headless: bool,
    log: Vec<LogLine>,
    report: Option<Report>,
    report_id: Option<String>,
    active_plan: Option<RunPlan>,
}

impl UiState {
    fn new(headless: bool) -> Self {
        Self {
            tab: 0,
            state: RunState::Idle,
            info: "Loading catalog…".to_string(),
            features: Vec::new(),
            suites: Vec::new(),
            selection: SelectionState::default(),
            cursor: 0,
            headless,
            log: Vec::new(),
            report: None,
            report_id: None,
            active_plan: None,
        }
    }

    /// Flatten the catalog into displayable rows, each feature followed
    /// by its scenarios.
    fn rows(&self) -> Vec<CatalogRow> {
        let mut rows = Vec::new();
        for (index, feature) in self.features.iter().enumerate() {
            rows.push(CatalogRow::Feature { index });
            for ordinal in 0..feature.scenarios.len() {
                rows.push(CatalogRow::Scenario {
                    feature: index,
                    ordinal,
                });
            }
        }
        rows
    }

    fn move_cursor(&mut self, delta: isize) {
        let rows = self.rows().len();
        if rows == 0 {
            self.cursor = 0;
            return;
        }
        let cursor = self.cursor as isize + delta;
        self.cursor = cursor.clamp(0, rows as isize - 1) as usize;
    }

    /// Toggle the row under the cursor: a scenario flips itself, a
    /// feature heading flips all of its scenarios at once.
    fn toggle_at_cursor(&mut self) {
        let Some(row) = self.rows().get(self.cursor).copied() else {
            return;
        };
        match row {
            CatalogRow::Feature { index } => {
                self.selection.toggle_feature(&self.features[index]);
            }
            CatalogRow::Scenario { feature, ordinal } => {
                let key = ScenarioKey::new(&self.features[feature], ordinal);
                self.selection.toggle(key);
            }
        }
    }

    /// Feature the cursor sits in, whether on its heading or a child.
    fn cursor_feature(&self) -> Option<usize> {
        match self.rows().get(self.cursor).copied()? {
            CatalogRow::Feature { index } => Some(index),
            CatalogRow::Scenario { feature, .. } => Some(feature),
        }
    }

    /// Build the launch plan for the cursor's feature from the current
    /// selection. `None` when nothing in that feature is selected.
    fn launch_plan(&self, project_id: &str) -> Option<RunPlan> {
        let feature = &self.features[self.cursor_feature()?];
        let scenario_names = self.selection.selected_names(feature);
        if scenario_names.is_empty() {
            return None;
        }
        Some(RunPlan {
            project_id: project_id.to_string(),
            feature_id: feature.id.clone(),
            feature_name: feature.name.clone(),
            scenario_names,
            headless: self.headless,
        })
    }

    fn apply_event(&mut self, ev: RunEvent) {
        match ev {
            RunEvent::CatalogLoaded { features, suites } => {
                self.features = features;
                self.suites = suites;
                self.selection.clear();
                self.cursor = 0;
                self.info = if self.features.is_empty() {
                    "No feature files found. Generate tests for this project first.".to_string()
                } else {
                    format!(
                        "{} feature(s), {} suite(s) loaded.",
                        self.features.len(),
                        self.suites.len()
                    )
                };
            }
            RunEvent::StateChanged(state) => {
                if state == RunState::Selecting && self.state.is_terminal() {
                    // Reset clears everything the finished run left behind.
                    self.log.clear();
                    self.report = None;
                    self.report_id = None;
                    self.active_plan = None;
                    self.selection.clear();
                    self.tab = 0;
                }
                self.state = state;
                // Every run enters through Launching; follow it to the
                // Run tab so the log is in view from the first line.
                if state == RunState::Launching {
                    self.tab = 1;
                }
            }
            RunEvent::RunAccepted { report_id } => self.report_id = Some(report_id),
            RunEvent::LogLine(line) => self.log.push(line),
            RunEvent::ReportReady { report } => {
                if !report.id.is_empty() {
                    self.report_id = Some(report.id.clone());
                }
                self.report = Some(*report);
            }
            RunEvent::Info(text) => self.info = text,
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure between the UI thread and
    // the controller.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let cfg = build_config(&args);

    // The catalog request goes out before the UI thread owns cmd_tx.
    let _ = cmd_tx.send(UiCommand::LoadCatalog);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_cfg, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&cfg, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    cfg: SessionConfig,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::new(cfg.headless);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive; unbounded channel avoids backpressure.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 3;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 2;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        if state.tab == 0 {
                            state.move_cursor(-1);
                        }
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        if state.tab == 0 {
                            state.move_cursor(1);
                        }
                    }
                    (_, KeyCode::Char(' ')) => {
                        if state.tab == 0 && state.state == RunState::Selecting {
                            state.toggle_at_cursor();
                        }
                    }
                    (_, KeyCode::Char('a')) => {
                        if state.tab == 0 && state.state == RunState::Selecting {
                            if let Some(index) = state.cursor_feature() {
                                state.selection.toggle_feature(&state.features[index]);
                            }
                        }
                    }
                    (_, KeyCode::Enter) => {
                        if state.state == RunState::Selecting {
                            match state.launch_plan(&cfg.project_id) {
                                Some(plan) => {
                                    state.active_plan = Some(plan.clone());
                                    state.info = "Launching…".to_string();
                                    let _ = cmd_tx.send(UiCommand::Launch(plan));
                                }
                                None => {
                                    state.info =
                                        "Select at least one scenario first.".to_string();
                                }
                            }
                        }
                    }
                    (_, KeyCode::Char('h')) => {
                        if state.state == RunState::Selecting {
                            state.headless = !state.headless;
                        }
                    }
                    (_, KeyCode::Char('r')) => {
                        if matches!(state.state, RunState::Idle | RunState::Selecting) {
                            state.info = "Reloading catalog…".to_string();
                            let _ = cmd_tx.send(UiCommand::LoadCatalog);
                        }
                    }
                    (_, KeyCode::Char('g')) => {
                        if state.state == RunState::Running {
                            let _ = cmd_tx.send(UiCommand::GracefulStop);
                        }
                    }
                    (_, KeyCode::Char('f')) => {
                        if state.state.is_active() {
                            let _ = cmd_tx.send(UiCommand::ForcedStop);
                        }
                    }
                    (_, KeyCode::Char('s')) => {
                        if state.tab == 1 {
                            save_report(&mut state);
                        }
                    }
                    (_, KeyCode::Char('n')) => {
                        if state.state.is_terminal() {
                            let _ = cmd_tx.send(UiCommand::Reset);
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Select"),
        Line::from("Run"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("gherkin-run-cli"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_select(chunks[1], f, state),
        1 => draw_run(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_select(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(8)].as_ref())
        .split(area);

    let rows = state.rows();
    let visible = chunks[0].height.saturating_sub(2) as usize;
    // Keep the cursor inside the window when the list outgrows it.
    let skip = if visible > 0 && state.cursor >= visible {
        state.cursor + 1 - visible
    } else {
        0
    };

    let mut lines: Vec<Line> = Vec::new();
    for (i, row) in rows.iter().enumerate().skip(skip).take(visible.max(1)) {
        let cursor = if i == state.cursor { "> " } else { "  " };
        match *row {
            CatalogRow::Feature { index } => {
                let feature = &state.features[index];
                let (selected, total, tri) = state.selection.summary(feature);
                let mark = match tri {
                    TriState::None => "[ ]",
                    TriState::Some => "[~]",
                    TriState::All => "[x]",
                };
                lines.push(Line::from(vec![
                    Span::raw(cursor.to_string()),
                    Span::styled(mark.to_string(), Style::default().fg(Color::Yellow)),
                    Span::raw(format!(" {}  ", feature.name)),
                    Span::styled(
                        format!("{selected}/{total}"),
                        Style::default().fg(Color::Gray),
                    ),
                ]));
            }
            CatalogRow::Scenario { feature, ordinal } => {
                let parent = &state.features[feature];
                let scenario = &parent.scenarios[ordinal];
                let key = ScenarioKey::new(parent, ordinal);
                let mark = if state.selection.is_selected(&key) {
                    "[x]"
                } else {
                    "[ ]"
                };
                lines.push(Line::from(vec![
                    Span::raw(cursor.to_string()),
                    Span::raw(format!("    {mark} {}  ", scenario.name)),
                    Span::styled(
                        format!("[{} steps]", scenario.step_count),
                        Style::default().fg(Color::Gray),
                    ),
                ]));
            }
        }
    }
    if lines.is_empty() {
        lines.push(Line::from("No features loaded."));
    }

    let catalog =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Features"));
    f.render_widget(catalog, chunks[0]);

    let status_lines = vec![
        Line::from(vec![
            Span::styled("State: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{:?}", state.state)),
            Span::raw("   "),
            Span::styled("Selected: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}", state.selection.selected_count())),
            Span::raw("   "),
            Span::styled("Headless: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}", state.headless)),
        ]),
        Line::from(vec![
            Span::styled("Suites: ", Style::default().fg(Color::Gray)),
            Span::raw(if state.suites.is_empty() {
                "none".to_string()
            } else {
                format!("{} traditional (not launchable here)", state.suites.len())
            }),
        ]),
        Line::from(vec![
            Span::styled("Info: ", Style::default().fg(Color::Gray)),
            Span::raw(state.info.clone()),
        ]),
        Line::from(""),
        Line::from(
            "Keys: space toggle | a feature | enter run | h headless | r reload | tab switch | ? help",
        ),
    ];
    let status =
        Paragraph::new(status_lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[1]);
}

fn draw_run(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)].as_ref())
        .split(area);

    let state_color = match state.state {
        RunState::Running => Color::Yellow,
        RunState::Completed => Color::Green,
        RunState::Failed => Color::Red,
        RunState::Cancelled => Color::Magenta,
        _ => Color::Gray,
    };
    let mut status_lines = vec![Line::from(vec![
        Span::styled("State: ", Style::default().fg(Color::Gray)),
        Span::styled(
            format!("{:?}", state.state),
            Style::default().fg(state_color),
        ),
        Span::raw("   "),
        Span::styled("Report: ", Style::default().fg(Color::Gray)),
        Span::raw(state.report_id.as_deref().unwrap_or("-").to_string()),
    ])];
    if let Some(plan) = state.active_plan.as_ref() {
        status_lines.push(Line::from(vec![
            Span::styled("Feature: ", Style::default().fg(Color::Gray)),
            Span::raw(format!(
                "{} ({} scenario(s), headless {})",
                plan.feature_name,
                plan.scenario_names.len(),
                plan.headless
            )),
        ]));
    }
    if let Some(report) = state.report.as_ref() {
        status_lines.push(Line::from(vec![
            Span::styled("Result: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} passed", report.passed),
                Style::default().fg(Color::Green),
            ),
            Span::raw(" / "),
            Span::styled(
                format!("{} failed", report.failed),
                Style::default().fg(if report.failed > 0 {
                    Color::Red
                } else {
                    Color::Green
                }),
            ),
            Span::raw(format!(" of {} total", report.total_tests)),
        ]));
    }
    status_lines.push(Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.clone()),
    ]));
    status_lines.push(Line::from(
        "Keys: g graceful stop | f force stop | s save report | n new run | tab switch",
    ));
    let status =
        Paragraph::new(status_lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[0]);

    // Log pane shows the tail that fits.
    let visible = chunks[1].height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let log_lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|line| {
            let text_span = match line.class {
                LogClass::Pass => {
                    Span::styled(line.text.clone(), Style::default().fg(Color::Green))
                }
                LogClass::Fail => Span::styled(line.text.clone(), Style::default().fg(Color::Red)),
                LogClass::Info => Span::raw(line.text.clone()),
            };
            Line::from(vec![
                Span::styled(
                    format!("{:>4} ", line.seq),
                    Style::default().fg(Color::DarkGray),
                ),
                text_span,
            ])
        })
        .collect();
    let log = Paragraph::new(log_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Log ({} lines)", state.log.len())),
    );
    f.render_widget(log, chunks[1]);
}

fn draw_help(area: Rect, f: &mut ratatui::Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("tab", Style::default().fg(Color::Magenta)),
            Span::raw("         Switch tabs"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("?", Style::default().fg(Color::Magenta)),
            Span::raw("           Show this help"),
        ]),
        Line::from(""),
        Line::from("Select tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Navigate"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("space", Style::default().fg(Color::Magenta)),
            Span::raw("       Toggle scenario or feature"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("a", Style::default().fg(Color::Magenta)),
            Span::raw("           Toggle the whole feature"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("enter", Style::default().fg(Color::Magenta)),
            Span::raw("       Launch the selected scenarios"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("h", Style::default().fg(Color::Magenta)),
            Span::raw("           Toggle headless mode"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("r", Style::default().fg(Color::Magenta)),
            Span::raw("           Reload the catalog"),
        ]),
        Line::from(""),
        Line::from("Run tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("g", Style::default().fg(Color::Magenta)),
            Span::raw("           Graceful stop (after current scenario)"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("f", Style::default().fg(Color::Magenta)),
            Span::raw("           Force stop (cancel immediately)"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("s", Style::default().fg(Color::Magenta)),
            Span::raw("           Save the report as JSON"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("n", Style::default().fg(Color::Magenta)),
            Span::raw("           New run (back to selection)"),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}

/// Export the finished report to the working directory and surface the
/// path in the status line.
fn save_report(state: &mut UiState) {
    let result = match (state.report.as_ref(), state.active_plan.as_ref()) {
        (Some(report), Some(plan)) => {
            let doc = export::ReportDocument::new(plan, report);
            export::default_export_path(&doc)
                .and_then(|path| export::export_json(&path, &doc).map(|()| path))
        }
        _ => {
            state.info = "No finished report to save yet.".to_string();
            return;
        }
    };
    match result {
        Ok(path) => {
            state.info = format!("Exported: {}", path.display());
        }
        Err(e) => {
            state.info = format!("Export failed: {e:#}");
        }
    }
}
