use crate::audio::{AudioEngine, NullAudioEngine, RodioAudioEngine};
use crate::command::Command;
use crate::config;
use crate::core::{CoreEvent, FAST_FORWARD_SECONDS, PlayerCore};
use crate::instance::InstanceGuard;
use crate::library::LibraryWorkers;
use crate::model::PersistedState;
use crate::selection::Modifiers;
use crate::ui::{self, PromptView};
use anyhow::Result;
use crossterm::cursor::Show;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Rect;
use ratatui::widgets::ListState;
use std::io::{Stdout, Write, stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const VOLUME_STEP: f32 = 0.05;

pub struct AppOptions {
    pub null_audio: bool,
    pub instance: Option<InstanceGuard>,
    pub initial_paths: Vec<PathBuf>,
}

/// Folder expansion the loop hands to the library workers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandRequest {
    pub inputs: Vec<PathBuf>,
    pub insert_at: Option<usize>,
    pub autoplay: bool,
}

pub fn run(options: AppOptions) -> Result<()> {
    let state = config::load_state().unwrap_or_else(|err| {
        log::warn!("using default preferences: {err:#}");
        PersistedState::default()
    });

    let audio: Box<dyn AudioEngine> = if options.null_audio {
        Box::new(NullAudioEngine::new())
    } else {
        match RodioAudioEngine::new() {
            Ok(engine) => Box::new(engine),
            Err(err) => {
                log::warn!("no audio output, continuing silently: {err:#}");
                Box::new(NullAudioEngine::new())
            }
        }
    };
    let mut core = PlayerCore::from_persisted(audio, state);
    let workers = LibraryWorkers::with_defaults()?;
    if !options.initial_paths.is_empty() {
        workers.request_expand(options.initial_paths, None, true);
    }

    let guard = TerminalGuard::enter(stdout())?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;
    let result = event_loop(&mut terminal, &mut core, &workers, options.instance.as_ref());
    drop(guard);

    let save_result = config::save_state(&core.persisted_state());
    result?;
    save_result?;
    Ok(())
}

/// Raw mode, alternate screen and mouse capture for as long as it lives. Dropping
/// it restores the terminal even when the loop bails out with an error.
struct TerminalGuard<W: Write> {
    out: W,
}

impl<W: Write> TerminalGuard<W> {
    fn enter(mut out: W) -> Result<Self> {
        enable_raw_mode()?;
        execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
        Ok(Self { out })
    }
}

impl<W: Write> Drop for TerminalGuard<W> {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            log::warn!("failed to leave raw mode: {err}");
        }
        if let Err(err) = execute!(self.out, LeaveAlternateScreen, DisableMouseCapture, Show) {
            log::warn!("failed to restore the terminal: {err}");
        }
    }
}

fn event_loop<A: AudioEngine>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    core: &mut PlayerCore<A>,
    workers: &LibraryWorkers,
    instance: Option<&InstanceGuard>,
) -> Result<()> {
    let mut app = App::default();
    let mut last_draw = Instant::now();

    loop {
        pump(core, workers, instance);

        if core.dirty || last_draw.elapsed() > Duration::from_millis(250) {
            app.clamp_cursor(core.catalog().len());
            terminal.draw(|frame| {
                app.playlist_rect = ui::playlist_rect(frame.area(), core.playlist_visible());
                let prompt = app.prompt.as_deref().map(|buffer| PromptView { buffer });
                ui::draw(frame, core, app.cursor, &mut app.list_state, prompt);
            })?;
            core.dirty = false;
            last_draw = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let request = match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(core, key),
            Event::Mouse(mouse) => {
                app.handle_mouse(core, mouse);
                None
            }
            Event::Resize(_, _) => {
                core.dirty = true;
                None
            }
            _ => None,
        };
        if let Some(request) = request {
            workers.request_expand(request.inputs, request.insert_at, request.autoplay);
        }
        if app.quit {
            return Ok(());
        }
    }
}

/// One turn of background bookkeeping: worker results, forwarded files, the
/// engine clock, and preference writes.
fn pump<A: AudioEngine>(
    core: &mut PlayerCore<A>,
    workers: &LibraryWorkers,
    instance: Option<&InstanceGuard>,
) {
    while let Some(command) = workers.try_recv() {
        core.apply(command);
    }
    if let Some(instance) = instance {
        while let Some(path) = instance.try_recv() {
            log::info!("opening forwarded file {}", path.display());
            core.apply(Command::OpenFile(config::normalize_path(&path)));
        }
    }

    core.tick();

    for path in core.take_metadata_requests() {
        workers.request_metadata(path);
    }
    for path in core.take_waveform_requests() {
        workers.request_waveform(path);
    }

    let preferences_changed = core
        .drain_events()
        .iter()
        .any(|event| *event == CoreEvent::PreferencesChanged);
    if preferences_changed && let Err(err) = config::save_state(&core.persisted_state()) {
        log::warn!("could not save preferences: {err:#}");
        core.message = format!("save error: {err:#}");
        core.dirty = true;
    }
}

#[derive(Default)]
struct App {
    cursor: usize,
    /// Row where the current Shift+arrow range started.
    extend_origin: Option<usize>,
    prompt: Option<String>,
    drag_from: Option<usize>,
    list_state: ListState,
    playlist_rect: Option<Rect>,
    quit: bool,
}

impl App {
    fn clamp_cursor(&mut self, len: usize) {
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }

    fn handle_key<A: AudioEngine>(
        &mut self,
        core: &mut PlayerCore<A>,
        key: KeyEvent,
    ) -> Option<ExpandRequest> {
        if let Some(buffer) = self.prompt.as_mut() {
            match key.code {
                KeyCode::Esc => self.prompt = None,
                KeyCode::Enter => {
                    let raw = std::mem::take(buffer);
                    self.prompt = None;
                    core.dirty = true;
                    return run_command(core, &raw);
                }
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(ch) => buffer.push(ch),
                _ => {}
            }
            core.dirty = true;
            return None;
        }

        let len = core.catalog().len();
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);

        match key.code {
            KeyCode::Char('c') if ctrl => self.quit = true,
            KeyCode::Char('a') if ctrl => core.apply(Command::SelectAll),
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char(' ') => core.apply(Command::PlayPause),
            KeyCode::Char('s') => core.apply(Command::Stop),
            KeyCode::Char('n') => core.apply(Command::Next),
            KeyCode::Char('b') => core.apply(Command::Prev),
            KeyCode::Left => core.apply(Command::FastForward(-FAST_FORWARD_SECONDS)),
            KeyCode::Right => core.apply(Command::FastForward(FAST_FORWARD_SECONDS)),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                core.apply(Command::SetVolume(core.volume() + VOLUME_STEP));
            }
            KeyCode::Char('-') => core.apply(Command::SetVolume(core.volume() - VOLUME_STEP)),
            KeyCode::Char('m') => core.apply(Command::ToggleMute),
            KeyCode::Char('z') => core.apply(Command::ToggleShuffle),
            KeyCode::Char('p') => core.apply(Command::TogglePlaylist),
            KeyCode::Up if len > 0 => self.move_cursor(core, self.cursor.saturating_sub(1), shift),
            KeyCode::Down if len > 0 => {
                self.move_cursor(core, (self.cursor + 1).min(len - 1), shift);
            }
            KeyCode::Char('J') if self.cursor + 1 < len => {
                core.apply(Command::MoveTrackTo {
                    from: self.cursor,
                    index: self.cursor + 1,
                });
                self.cursor += 1;
            }
            KeyCode::Char('K') if self.cursor > 0 && self.cursor < len => {
                core.apply(Command::MoveTrackTo {
                    from: self.cursor,
                    index: self.cursor - 1,
                });
                self.cursor -= 1;
            }
            KeyCode::Enter if len > 0 => core.apply(Command::Play(self.cursor.min(len - 1))),
            KeyCode::Delete => core.apply(Command::RemoveSelected),
            KeyCode::Char(':') => {
                self.prompt = Some(String::new());
                core.dirty = true;
            }
            _ => {}
        }

        self.clamp_cursor(core.catalog().len());
        None
    }

    fn move_cursor<A: AudioEngine>(&mut self, core: &mut PlayerCore<A>, target: usize, extend: bool) {
        if extend {
            let origin = *self.extend_origin.get_or_insert(self.cursor);
            core.apply(Command::Select {
                index: origin,
                modifiers: Modifiers::NONE,
            });
            core.apply(Command::Select {
                index: target,
                modifiers: Modifiers {
                    shift: true,
                    ctrl: false,
                },
            });
        } else {
            self.extend_origin = None;
            core.apply(Command::Select {
                index: target,
                modifiers: Modifiers::NONE,
            });
        }
        self.cursor = target;
    }

    fn handle_mouse<A: AudioEngine>(&mut self, core: &mut PlayerCore<A>, mouse: MouseEvent) {
        let Some(rect) = self.playlist_rect else {
            return;
        };
        let len = core.catalog().len();
        let row = if point_in_rect(mouse.column, mouse.row, rect) {
            ui::playlist_row_at(rect, mouse.row, self.list_state.offset(), len)
        } else {
            None
        };
        let modifiers = Modifiers {
            shift: mouse.modifiers.contains(KeyModifiers::SHIFT),
            ctrl: mouse
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER),
        };

        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let Some(index) = row.filter(|index| *index < len) else {
                    return;
                };
                core.apply(Command::Select { index, modifiers });
                self.cursor = index;
                self.extend_origin = None;
                self.drag_from = (!modifiers.any()).then_some(index);
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let Some(from) = self.drag_from.take() else {
                    return;
                };
                let Some(target) = row.filter(|target| *target != from) else {
                    return;
                };
                core.apply(Command::MoveTrack {
                    from,
                    to: drop_slot(from, target, len),
                });
                self.cursor = core.selection().anchor().unwrap_or(self.cursor);
            }
            MouseEventKind::Down(MouseButton::Right) => {
                if let Some(index) = row.filter(|index| *index < len) {
                    core.apply(Command::ContextSelect { index, modifiers });
                    self.cursor = index;
                }
            }
            MouseEventKind::ScrollDown if row.is_some() => {
                self.cursor = (self.cursor + 1).min(len.saturating_sub(1));
                core.dirty = true;
            }
            MouseEventKind::ScrollUp if row.is_some() => {
                self.cursor = self.cursor.saturating_sub(1);
                core.dirty = true;
            }
            _ => {}
        }
    }
}

/// Converts "dropped on row `target`" into the slot between rows that
/// `Command::MoveTrack` expects. Dropping below the last row means the end.
fn drop_slot(from: usize, target: usize, len: usize) -> usize {
    if target >= len {
        len
    } else if target > from {
        target + 1
    } else {
        target
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn run_command<A: AudioEngine>(core: &mut PlayerCore<A>, raw: &str) -> Option<ExpandRequest> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => {
            report(
                core,
                "Commands: add <path> | insert <row> <path> | open <file> | seek <seconds> | volume <0-100> | remove",
            );
            None
        }
        "add" => {
            if rest.is_empty() {
                report(core, "Usage: add <path>");
                return None;
            }
            Some(ExpandRequest {
                inputs: vec![user_path(rest)],
                insert_at: None,
                autoplay: core.catalog().is_empty(),
            })
        }
        "insert" => {
            let mut insert_split = rest.splitn(2, char::is_whitespace);
            let row = insert_split.next().and_then(|value| value.parse::<usize>().ok());
            let path = insert_split.next().unwrap_or("").trim();
            match row {
                Some(row) if row > 0 && !path.is_empty() => Some(ExpandRequest {
                    inputs: vec![user_path(path)],
                    insert_at: Some(row - 1),
                    autoplay: false,
                }),
                _ => {
                    report(core, "Usage: insert <row> <path>");
                    None
                }
            }
        }
        "open" => {
            let path = user_path(rest);
            if rest.is_empty() {
                report(core, "Usage: open <file>");
            } else if !path.is_file() {
                core.message = format!("No such file: {}", path.display());
            } else {
                core.apply(Command::OpenFile(config::normalize_path(&path)));
            }
            None
        }
        "seek" => {
            match rest.parse::<f64>() {
                Ok(seconds) => core.apply(Command::Seek(seconds)),
                Err(_) => report(core, "Usage: seek <seconds>"),
            }
            None
        }
        "volume" => {
            match rest.parse::<f32>() {
                Ok(percent) => core.apply(Command::SetVolume(percent / 100.0)),
                Err(_) => report(core, "Usage: volume <0-100>"),
            }
            None
        }
        "remove" => {
            core.apply(Command::RemoveSelected);
            None
        }
        _ => {
            report(core, "Unknown command. Use :help");
            None
        }
    }
}

fn user_path(raw: &str) -> PathBuf {
    PathBuf::from(raw.trim_matches('"'))
}

fn report<A: AudioEngine>(core: &mut PlayerCore<A>, message: &str) {
    core.message = message.to_string();
    core.dirty = true;
}
