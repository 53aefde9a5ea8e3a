use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use hidecursor::clock::{Clock, MonotonicClock};
use hidecursor::config::Config;
use hidecursor::error::{HostError, InitError};
use hidecursor::extension::Extension;
use hidecursor::host::{ActivitySignal, ActivitySource, Host, PointerSink, Tracker};
use hidecursor::scheduler::{CancelToken, MainLoop};
use hidecursor::signal::{Handler, SignalHub};
use hidecursor::utils::format_micros;
use hidecursor::watcher::Phase;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

const REDRAW_EVERY: Duration = Duration::from_millis(200);
const LOG_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerShape {
    Arrow,
    Hand,
    Text,
    Crosshair,
}

impl PointerShape {
    fn next(self) -> Self {
        match self {
            PointerShape::Arrow => PointerShape::Hand,
            PointerShape::Hand => PointerShape::Text,
            PointerShape::Text => PointerShape::Crosshair,
            PointerShape::Crosshair => PointerShape::Arrow,
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            PointerShape::Arrow => "↖",
            PointerShape::Hand => "☝",
            PointerShape::Text => "I",
            PointerShape::Crosshair => "+",
        }
    }
}

/// Pointer drawn inside the terminal. Real mouse motion reveals it before the
/// motion is reported, the way a compositor treats its own cursor.
struct TerminalTracker {
    visible: Cell<bool>,
    shape: Cell<PointerShape>,
    position: Cell<(u16, u16)>,
    signals: SignalHub,
    log: RefCell<VecDeque<String>>,
}

impl TerminalTracker {
    fn new() -> Self {
        Self {
            visible: Cell::new(true),
            shape: Cell::new(PointerShape::Arrow),
            position: Cell::new((0, 0)),
            signals: SignalHub::new(),
            log: RefCell::new(VecDeque::new()),
        }
    }

    fn record(&self, text: impl Into<String>) {
        let mut log = self.log.borrow_mut();
        log.push_front(format!("{}  {}", Local::now().format("%H:%M:%S"), text.into()));
        log.truncate(LOG_LINES);
    }

    fn user_move(&self, column: u16, row: u16) {
        self.position.set((column, row));
        self.visible.set(true);
        self.signals.emit(ActivitySignal::PositionInvalidated);
    }

    fn warp(&self, column: u16, row: u16) {
        self.position.set((column, row));
        self.record(format!("warp to {},{}", column, row));
        self.signals.emit(ActivitySignal::PositionInvalidated);
    }

    fn cycle_shape(&self) {
        let shape = self.shape.get().next();
        self.shape.set(shape);
        self.record(format!("shape -> {:?}", shape));
        self.signals.emit(ActivitySignal::CursorChanged);
    }

    fn toggle_visibility(&self) {
        let visible = !self.visible.get();
        self.visible.set(visible);
        self.record(if visible {
            "shown externally"
        } else {
            "hidden externally"
        });
        self.signals.emit(ActivitySignal::VisibilityChanged);
    }
}

impl ActivitySource for TerminalTracker {
    fn connect(&self, signal: ActivitySignal, handler: Handler) -> CancelToken {
        self.signals.connect(signal, handler)
    }

    fn is_pointer_visible(&self) -> bool {
        self.visible.get()
    }
}

impl PointerSink for TerminalTracker {
    fn set_pointer_visible(&self, visible: bool) -> Result<(), HostError> {
        if self.visible.get() != visible {
            self.record(if visible { "show" } else { "hide" });
        }
        self.visible.set(visible);
        Ok(())
    }
}

struct TerminalHost {
    clock: Rc<MonotonicClock>,
    main_loop: MainLoop,
    tracker: Rc<TerminalTracker>,
}

impl TerminalHost {
    fn new() -> Self {
        let clock = Rc::new(MonotonicClock::new());
        Self {
            main_loop: MainLoop::new(clock.clone()),
            clock,
            tracker: Rc::new(TerminalTracker::new()),
        }
    }
}

impl Host for TerminalHost {
    fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    fn tracker(&self) -> Result<Rc<dyn Tracker>, InitError> {
        Ok(self.tracker.clone())
    }
}

pub fn run_tui(config: Config) -> Result<()> {
    let mut ext = Extension::new(TerminalHost::new(), config);
    if let Err(e) = ext.enable() {
        ext.host().tracker.record(format!("enable failed: {}", e));
    }

    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_loop(&mut terminal, &mut ext);

    ext.disable();

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{:?}", err)
    }

    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ext: &mut Extension<TerminalHost>,
) -> Result<()> {
    loop {
        terminal.draw(|f| draw(f, ext))?;

        let timeout = ext
            .host()
            .main_loop()
            .time_until_next()
            .map_or(REDRAW_EVERY, |next| next.min(REDRAW_EVERY));

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') => return Ok(()),
                    KeyCode::Char('e') => toggle_enabled(ext),
                    KeyCode::Char('v') => ext.host().tracker.toggle_visibility(),
                    KeyCode::Char('s') => ext.host().tracker.cycle_shape(),
                    KeyCode::Char('w') => {
                        let (columns, rows) = crossterm::terminal::size()?;
                        ext.host().tracker.warp(columns / 2, rows / 2);
                    }
                    _ => {}
                },
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                        ext.host().tracker.user_move(mouse.column, mouse.row)
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        ext.host().main_loop().dispatch();
    }
}

fn toggle_enabled(ext: &mut Extension<TerminalHost>) {
    if ext.is_enabled() {
        ext.disable();
        ext.host().tracker.record("extension disabled");
    } else {
        match ext.enable() {
            Ok(()) => ext.host().tracker.record("extension enabled"),
            Err(e) => ext.host().tracker.record(format!("enable failed: {}", e)),
        }
    }
}

fn draw(frame: &mut Frame, ext: &Extension<TerminalHost>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(7), // Stats
            Constraint::Min(0),    // Log
            Constraint::Length(3), // Footer
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], ext);
    draw_stats(frame, chunks[1], ext);
    draw_log(frame, chunks[2], ext);
    draw_footer(frame, chunks[3]);
    draw_pointer(frame, ext);
}

fn draw_header(frame: &mut Frame, area: Rect, ext: &Extension<TerminalHost>) {
    let status_text = match ext.phase() {
        Phase::Visible => Span::styled(
            "VISIBLE",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Phase::Hidden => Span::styled(
            "HIDDEN",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Phase::Disabled => Span::styled(
            "DISABLED",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            " hidecursor ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        status_text,
        Span::raw(" | "),
        Span::raw(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
    ]))
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(header, area);
}

fn draw_stats(frame: &mut Frame, area: Rect, ext: &Extension<TerminalHost>) {
    let config = ext.config();
    let mut lines = vec![Line::from(vec![
        Span::raw("  Hide after: "),
        Span::styled(
            format_micros(config.idle_threshold_micros),
            Style::default().fg(Color::Magenta),
        ),
        Span::raw(format!(
            " | Poll: {}s | Policy: {}",
            config.poll_interval_secs, config.policy
        )),
    ])];

    match ext.status() {
        Some(status) => {
            lines.push(Line::raw(format!(
                "  Idle for: {}",
                format_micros(status.idle_micros)
            )));
            lines.push(Line::raw(format!(
                "  Hides: {} | Reveals: {}",
                status.counters.hides, status.counters.reveals
            )));
            lines.push(Line::raw(format!(
                "  Activity: {} | Ignored: {}",
                status.counters.activity, status.counters.ignored
            )));
        }
        None => lines.push(Line::raw("  Not watching")),
    }

    let tracker = &ext.host().tracker;
    let (column, row) = tracker.position.get();
    lines.push(Line::raw(format!(
        "  Pointer: {:?} at {},{} ({})",
        tracker.shape.get(),
        column,
        row,
        if tracker.visible.get() { "shown" } else { "hidden" }
    )));

    let block = Block::default()
        .title(Span::styled(
            " WATCHER ",
            Style::default().add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_log(frame: &mut Frame, area: Rect, ext: &Extension<TerminalHost>) {
    let lines: Vec<Line> = ext
        .host()
        .tracker
        .log
        .borrow()
        .iter()
        .map(|entry| Line::raw(format!("  {}", entry)))
        .collect();

    let block = Block::default().title(" Events ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_footer(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "'q' quit | 'e' enable/disable | 'v' toggle visibility | 's' shape | 'w' warp",
    )
    .block(Block::default().borders(Borders::ALL))
    .alignment(ratatui::layout::Alignment::Center);
    frame.render_widget(help, area);
}

fn draw_pointer(frame: &mut Frame, ext: &Extension<TerminalHost>) {
    let tracker = &ext.host().tracker;
    if !tracker.visible.get() {
        return;
    }

    let area = frame.size();
    let (column, row) = tracker.position.get();
    if column >= area.right() || row >= area.bottom() {
        return;
    }

    let glyph = Paragraph::new(tracker.shape.get().glyph()).style(
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    frame.render_widget(glyph, Rect::new(column, row, 1, 1));
}
