//! Interactive terminal monitor for the resource directory and task queues.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use drbd_model::{
    DispatchOutcome, EventDispatcher, FailureKind, FlagState, LogLevel, OrderedMap,
    ResourceDirectory, StateFlagged,
};
use drbd_tasks::{
    CmdLine, ConnectionAction, DrbdAdm, PeerVolumeAction, QueueKind, QueueObserver, ResourceAction,
    SystemProcessFactory, TaskId, TaskQueue, TaskSnapshot, TaskState, VolumeAction,
    EXIT_STATUS_NONE,
};
use ratatui::backend::CrosstermBackend;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph, Tabs, Wrap},
    Terminal,
};
use smol_str::SmolStr;
use tracing::{info, warn};

use crate::config::{default_config_path, ColorScheme, ConsoleConfig};
use crate::source::{EventSource, SourceEvent};

mod commands;
mod input;
mod render;
mod state;

use commands::*;
use input::{handle_key, handle_mouse, KeyOutcome};
use render::render_ui;
use state::*;

const COLOR_TEAL: Color = Color::Rgb(0, 168, 150);
const COLOR_GREEN: Color = Color::Rgb(46, 204, 113);
const COLOR_AMBER: Color = Color::Rgb(243, 156, 18);
const COLOR_RED: Color = Color::Rgb(231, 76, 60);
const COLOR_INFO: Color = Color::Rgb(142, 142, 147);
const COLOR_CYAN: Color = Color::Rgb(64, 212, 255);
const COLOR_MAGENTA: Color = Color::Rgb(191, 90, 242);
const COLOR_PROMPT_BG: Color = Color::Rgb(24, 24, 24);

/// Lines applied per frame, so a burst of events cannot starve input.
const MAX_LINES_PER_FRAME: usize = 4096;
const INPUT_POLL: StdDuration = StdDuration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Palette {
    norm: Color,
    mark: Color,
    warn: Color,
    alert: Color,
    accent: Color,
    text: Color,
    dim: Color,
    selection_bg: Color,
}

impl Palette {
    fn for_scheme(scheme: ColorScheme) -> Self {
        match scheme {
            ColorScheme::Default | ColorScheme::Dark => Self {
                norm: COLOR_GREEN,
                mark: COLOR_CYAN,
                warn: COLOR_AMBER,
                alert: COLOR_RED,
                accent: COLOR_TEAL,
                text: if scheme == ColorScheme::Dark {
                    Color::Rgb(220, 220, 220)
                } else {
                    Color::Reset
                },
                dim: COLOR_INFO,
                selection_bg: COLOR_PROMPT_BG,
            },
            ColorScheme::Light => Self {
                norm: Color::Rgb(30, 132, 73),
                mark: Color::Rgb(21, 101, 192),
                warn: Color::Rgb(176, 96, 0),
                alert: Color::Rgb(183, 28, 28),
                accent: COLOR_MAGENTA,
                text: Color::Black,
                dim: Color::Rgb(99, 99, 102),
                selection_bg: Color::Rgb(220, 220, 220),
            },
            ColorScheme::Mono => Self {
                norm: Color::Reset,
                mark: Color::Reset,
                warn: Color::Reset,
                alert: Color::Reset,
                accent: Color::Reset,
                text: Color::Reset,
                dim: Color::Reset,
                selection_bg: Color::Reset,
            },
        }
    }

    fn flag(&self, state: FlagState) -> Style {
        let style = match state {
            FlagState::Norm => Style::default().fg(self.norm),
            FlagState::Mark => Style::default().fg(self.mark),
            FlagState::Warn => Style::default().fg(self.warn),
            FlagState::Alert => Style::default().fg(self.alert).add_modifier(Modifier::BOLD),
        };
        if self.alert == Color::Reset && state == FlagState::Alert {
            style.add_modifier(Modifier::REVERSED)
        } else {
            style
        }
    }

    fn level(&self, level: LogLevel) -> Style {
        match level {
            LogLevel::Info => Style::default().fg(self.dim),
            LogLevel::Warn => Style::default().fg(self.warn),
            LogLevel::Alert => Style::default().fg(self.alert).add_modifier(Modifier::BOLD),
        }
    }

    fn selected(&self) -> Style {
        if self.selection_bg == Color::Reset {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
                .bg(self.selection_bg)
                .add_modifier(Modifier::BOLD)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UiNotice {
    QueueChanged,
    OutOfMemory,
}

/// Forwards queue notifications to the UI thread without blocking workers.
struct UiNotifier {
    tx: Sender<UiNotice>,
}

impl UiNotifier {
    fn send(&self, notice: UiNotice) {
        match self.tx.try_send(notice) {
            // a pending notice already triggers a refresh
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => warn!(?notice, "UI notification dropped"),
        }
    }
}

impl QueueObserver for UiNotifier {
    fn notify_queue_changed(&self) {
        self.send(UiNotice::QueueChanged);
    }

    fn notify_out_of_memory(&self) {
        self.send(UiNotice::OutOfMemory);
    }
}

/// Everything the key handlers act on besides the view state.
struct Console {
    dispatcher: EventDispatcher,
    queue: TaskQueue,
    drbdadm: DrbdAdm,
    config: ConsoleConfig,
    config_path: Option<PathBuf>,
}

/// The events source plus its respawn schedule.
struct Feed {
    events_file: Option<PathBuf>,
    command: Vec<String>,
    respawn_delay: StdDuration,
    source: Option<EventSource>,
    tx: Sender<SourceEvent>,
    rx: Receiver<SourceEvent>,
    respawn_at: Option<Instant>,
}

impl Feed {
    fn new(config: &ConsoleConfig, events_file: Option<PathBuf>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            events_file,
            command: config.events.command.clone(),
            respawn_delay: StdDuration::from_millis(config.events.respawn_delay_ms),
            source: None,
            tx,
            rx,
            respawn_at: None,
        }
    }

    fn is_replay(&self) -> bool {
        self.events_file.is_some()
    }

    fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        while self.rx.try_recv().is_ok() {}
    }

    /// Drops the model and starts reading a fresh state replay.
    fn restart(&mut self, console: &mut Console, state: &mut UiState) {
        self.stop();
        self.respawn_at = None;
        console.dispatcher.reset();
        let started = match &self.events_file {
            Some(path) => EventSource::from_file(path, self.tx.clone()),
            None => EventSource::spawn(&self.command, self.tx.clone()),
        };
        match started {
            Ok(source) => {
                info!("events source (re)started");
                self.source = Some(source);
            }
            Err(err) => {
                warn!(error = %err, "events source failed to start");
                let text = format!("Events source failed to start: {err:#}");
                console.dispatcher.log_mut().add_entry(LogLevel::Alert, text.clone());
                push_alert(state, &text, LogLevel::Alert);
                console.dispatcher.record_failure(FailureKind::EventsSource);
                self.schedule_respawn();
            }
        }
        resolve_selection(state, console.dispatcher.directory());
    }

    fn schedule_respawn(&mut self) {
        self.respawn_at = Some(Instant::now() + self.respawn_delay);
    }

    fn request_restart(&mut self) {
        self.respawn_at = Some(Instant::now());
    }

    fn respawn_due(&self) -> bool {
        self.respawn_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn pump_events(feed: &mut Feed, console: &mut Console, state: &mut UiState) {
    let mut changed = false;
    for _ in 0..MAX_LINES_PER_FRAME {
        let Ok(event) = feed.rx.try_recv() else {
            break;
        };
        match event {
            SourceEvent::Line(line) => match console.dispatcher.process_line(&line) {
                Ok(DispatchOutcome::Ignored) => {}
                Ok(_) => changed = true,
                Err(err) if err.requires_resync() && !feed.is_replay() => {
                    console.dispatcher.record_failure(FailureKind::Generic);
                    feed.stop();
                    feed.request_restart();
                    break;
                }
                Err(_) => {}
            },
            SourceEvent::Failed(kind) => {
                console.dispatcher.record_failure(kind);
                let text = format!("Status tracking interrupted: {kind}");
                console
                    .dispatcher
                    .log_mut()
                    .add_entry(LogLevel::Alert, text.clone());
                push_alert(state, &text, LogLevel::Alert);
                feed.stop();
                feed.schedule_respawn();
                break;
            }
            SourceEvent::Ended => {
                push_alert(
                    state,
                    "Replay complete",
                    LogLevel::Info,
                );
            }
        }
    }
    if changed {
        resolve_selection(state, console.dispatcher.directory());
    }
}

fn drain_notices(notices: &Receiver<UiNotice>, console: &mut Console, state: &mut UiState) {
    for notice in notices.try_iter() {
        match notice {
            UiNotice::QueueChanged => sync_task_selection(state, &console.queue),
            UiNotice::OutOfMemory => {
                let text = "Out of memory: task could not be started";
                console.dispatcher.log_mut().add_entry(LogLevel::Alert, text);
                push_alert(state, text, LogLevel::Alert);
            }
        }
    }
}

/// Runs the monitor until the operator quits.
pub fn run_ui(
    config: ConsoleConfig,
    config_path: Option<PathBuf>,
    events_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let queue = TaskQueue::new(Arc::new(SystemProcessFactory));
    queue.set_discard_finished(config.tasks.discard_finished);
    queue.set_discard_succeeded(config.tasks.discard_succeeded);
    let (notice_tx, notice_rx) = bounded(64);
    queue.set_observer(Some(Arc::new(UiNotifier { tx: notice_tx })));

    let mut state = UiState::new(&config);
    let mut feed = Feed::new(&config, events_file);
    let mut console = Console {
        dispatcher: EventDispatcher::new(),
        queue,
        drbdadm: DrbdAdm::new(config.drbd.drbdadm.clone()),
        config_path: config_path.or_else(default_config_path),
        config,
    };
    let mouse = console.config.display.enable_mouse_nav;
    let redraw = StdDuration::from_millis(console.config.display.interval_ms);

    feed.restart(&mut console, &mut state);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    if mouse {
        execute!(stdout, EnableMouseCapture)?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = (|| {
        let mut last_draw: Option<Instant> = None;
        loop {
            pump_events(&mut feed, &mut console, &mut state);
            drain_notices(&notice_rx, &mut console, &mut state);
            if feed.respawn_due() {
                feed.restart(&mut console, &mut state);
            }

            if state.dirty || last_draw.map_or(true, |at| at.elapsed() >= redraw) {
                terminal.draw(|frame| render_ui(frame.size(), frame, &state, &console))?;
                state.dirty = false;
                last_draw = Some(Instant::now());
            }

            if event::poll(INPUT_POLL)? {
                state.dirty = true;
                match event::read()? {
                    Event::Key(key) => match handle_key(key, &mut console, &mut state)? {
                        KeyOutcome::Continue => {}
                        KeyOutcome::Quit => break,
                        KeyOutcome::Repaint => terminal.clear()?,
                        KeyOutcome::Reinitialize => {
                            console.dispatcher.record_failure(FailureKind::Generic);
                            feed.restart(&mut console, &mut state);
                        }
                    },
                    Event::Mouse(mouse_event) if mouse => {
                        handle_mouse(mouse_event, &console, &mut state);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })();

    feed.stop();
    disable_raw_mode()?;
    if mouse {
        execute!(terminal.backend_mut(), DisableMouseCapture)?;
    }
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}
