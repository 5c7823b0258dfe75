use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{
    ListResult, ProgressEvent, ProgressSink, ProgressSinkKind, StatusResult, SyncResult,
};
use crate::error::InstallerError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Prepare,
    Fetch,
    Verify,
    Store,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Prepare => "Prepare",
            Phase::Fetch => "Fetch",
            Phase::Verify => "Verify",
            Phase::Store => "Store",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Resolve => 0,
            Phase::Prepare => 1,
            Phase::Fetch => 2,
            Phase::Verify => 3,
            Phase::Store => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    latency_ms: Option<u128>,
    files_fetched: u64,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    summary: Vec<String>,
    started: Instant,
    active: bool,
}

/// Full-screen progress view for interactive runs.
pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
                if phase == Phase::Fetch {
                    state.files_fetched = state.files_fetched.saturating_add(1);
                }
            } else if let Some(latency) = parse_latency(&message) {
                state.latency_ms = Some(latency);
            } else {
                state.status = message.clone();
            }

            let elapsed = state.started.elapsed();
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{:>6.1}s] {message}", elapsed.as_secs_f64()),
                LOGS_MAX,
            );
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                latency_ms: None,
                files_fetched: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                summary: Vec::new(),
                started: Instant::now(),
                active: false,
            })),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or Esc aborts the view.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, InstallerError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);
        let mut terminal = enter_screen()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                self.set_active(false);
                leave_screen()?;
                handle.join().ok();
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && is_quit(key)
            {
                break;
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        leave_screen()?;
        Err(miette::Report::msg("aborted"))
    }

    pub fn finish_sync(&mut self, result: &SyncResult) -> miette::Result<()> {
        let lines = result
            .items
            .iter()
            .map(|item| {
                let release = item.release.as_deref().unwrap_or("-");
                match &item.error {
                    Some(err) => format!("{} {release} failed: {err}", item.dataset),
                    None => format!(
                        "{} {release} {} ({} files, {})",
                        item.dataset,
                        item.action,
                        item.fetched_files,
                        bytes_to_human(item.fetched_bytes)
                    ),
                }
            })
            .collect();
        self.show_summary(lines)
    }

    pub fn finish_status(&mut self, result: &StatusResult) -> miette::Result<()> {
        let lines = result
            .datasets
            .iter()
            .map(|item| {
                let release = item.release.as_deref().unwrap_or("-");
                match (&item.summary, &item.error) {
                    (_, Some(err)) => format!("{} {release} error: {err}", item.dataset),
                    (Some(summary), None) => format!(
                        "{} {release}: {} ok, {} missing, {} corrupt, {} stale, {} to fetch",
                        item.dataset,
                        summary.satisfied,
                        summary.missing,
                        summary.corrupt,
                        summary.stale,
                        bytes_to_human(summary.bytes_to_fetch)
                    ),
                    (None, None) => format!("{} {release}: unknown", item.dataset),
                }
            })
            .collect();
        self.show_summary(lines)
    }

    pub fn finish_list(&mut self, result: &ListResult) -> miette::Result<()> {
        let lines = if result.datasets.is_empty() {
            vec!["no datasets installed".to_string()]
        } else {
            result
                .datasets
                .iter()
                .map(|item| {
                    format!(
                        "{} {} {} ({})",
                        item.dataset,
                        item.release.as_deref().unwrap_or("-"),
                        item.version,
                        bytes_to_human(item.bytes)
                    )
                })
                .collect()
        };
        self.show_summary(lines)
    }

    /// Shows `lines` until a key is pressed.
    fn show_summary(&mut self, lines: Vec<String>) -> miette::Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.summary = lines;
            state.status = "done (press any key)".to_string();
        }
        let mut terminal = enter_screen()?;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, 0))
                    .into_diagnostic()?;
            }
            if event::poll(Duration::from_millis(200)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && key.kind == KeyEventKind::Press
            {
                break;
            }
        }
        leave_screen()
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn enter_screen() -> miette::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode().into_diagnostic()?;
    stdout.execute(EnterAlternateScreen).into_diagnostic()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout)).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok(terminal)
}

fn leave_screen() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn is_quit(key: KeyEvent) -> bool {
    key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &AppState, tick: usize) {
    let area = frame.area();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(8),
            Constraint::Length(8),
        ])
        .split(area);
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[1]);

    frame.render_widget(draw_header(kind, tick), rows[0]);
    frame.render_widget(draw_status_panel(state), columns[0]);
    frame.render_widget(draw_details_panel(state), columns[1]);
    frame.render_widget(draw_logs(state), rows[2]);
}

fn draw_header(kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Sync => "Download",
        ProgressSinkKind::Status => "Status",
        ProgressSinkKind::List => "List",
    };
    Paragraph::new(Line::from(vec![
        Span::styled(
            "VARFISH-INSTALLER",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let progress = phase_progress(state.phase);
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let latency = state
        .latency_ms
        .map(|v| format!("{v} ms"))
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<7} ", state.phase),
                Style::default().fg(phase_color),
            ),
            Span::raw(progress_bar(progress)),
            Span::raw(format!(" {progress:>3}%")),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{:.1}s", state.started.elapsed().as_secs_f64())),
        ]),
        Line::from(vec![
            Span::styled("Files fetched: ", Style::default().fg(Color::Gray)),
            Span::raw(state.files_fetched.to_string()),
            Span::styled("   Latency: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
        ]),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ];
    if state.active {
        lines.push(Line::from(Span::styled(
            "q / Esc to leave",
            Style::default().fg(Color::DarkGray),
        )));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_details_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = Vec::new();
    if state.summary.is_empty() {
        lines.push(Line::from(Span::styled(
            "RECENT EVENTS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
        for event in state.events.iter().rev() {
            lines.push(Line::from(format!("- {event}")));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "SUMMARY",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )));
        for line in &state.summary {
            let color = if line.contains("failed") || line.contains("error") {
                Color::Red
            } else {
                Color::White
            };
            lines.push(Line::from(Span::styled(line.clone(), Style::default().fg(color))));
        }
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs(state: &AppState) -> Paragraph<'static> {
    let lines = state
        .logs
        .iter()
        .rev()
        .take(6)
        .rev()
        .map(|line| Line::from(Span::styled(line.clone(), Style::default().fg(Color::Gray))))
        .collect::<Vec<_>>();
    Paragraph::new(lines).block(Block::default().borders(Borders::TOP).title("Log"))
}

fn phase_progress(phase: Phase) -> u8 {
    (((phase.index() + 1) * 100) / 5) as u8
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (name, payload) = rest.split_once(';')?;
    let phase = match name {
        "Resolve" => Phase::Resolve,
        "Prepare" => Phase::Prepare,
        "Fetch" => Phase::Fetch,
        "Verify" => Phase::Verify,
        "Store" => Phase::Store,
        _ => return None,
    };
    Some((phase, payload.trim()))
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u128>().ok())
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn bytes_to_human(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.1} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
