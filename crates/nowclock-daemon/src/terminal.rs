//! Full-screen terminal rendering of the clock and playback views.
//!
//! `TerminalDisplay` is a cheap handle: clones share one screen.  The engine
//! owns one clone and the daemon keeps another to restore the terminal on
//! exit.  While the clock view is up, a background task re-renders it
//! whenever the formatted time text changes.

use std::io::{self, Stdout};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::format::{Item, StrftimeItems};
use nowclock_proto::config::DisplayConfig;
use nowclock_proto::DisplayMode;
use nowclock_sync::Display;
use ratatui::{
    backend::CrosstermBackend,
    crossterm::{
        cursor::{Hide, Show},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen},
    },
    layout::{Alignment, Constraint, Layout, Rect},
    text::Line,
    widgets::Paragraph,
    Frame, Terminal,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::theme::{style_clock, style_secondary, style_title};
use crate::widgets::progress_bar::draw_progress;

/// Field values of the current frame.
#[derive(Debug, Default)]
struct View {
    mode: DisplayMode,
    title: String,
    artist: String,
    album: String,
    track_number: String,
    /// `None` until a track length has been set.
    length: Option<f64>,
    elapsed: f64,
}

struct Screen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    view: View,
    clock_format: String,
    /// Clock text of the last rendered clock frame.
    last_clock: Option<String>,
    closed: bool,
}

#[derive(Clone)]
pub struct TerminalDisplay {
    screen: Arc<Mutex<Screen>>,
    clock: CancellationToken,
}

/// Reject formats chrono would fail on at render time.
pub fn check_clock_format(format: &str) -> anyhow::Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        bail!("invalid display.clock_format {:?}", format);
    }
    Ok(())
}

impl TerminalDisplay {
    /// Take over the terminal and start the clock task.
    pub fn new(config: &DisplayConfig) -> anyhow::Result<Self> {
        check_clock_format(&config.clock_format)?;

        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide).context("entering alternate screen")?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        debug!("terminal display up, size={:?}", terminal.size());

        let display = Self {
            screen: Arc::new(Mutex::new(Screen {
                terminal,
                view: View::default(),
                clock_format: config.clock_format.clone(),
                last_clock: None,
                closed: false,
            })),
            clock: CancellationToken::new(),
        };
        display.spawn_clock(Duration::from_secs_f64(config.clock_refresh_secs));
        Ok(display)
    }

    fn spawn_clock(&self, period: Duration) {
        let screen = self.screen.clone();
        let token = self.clock.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }
                let mut screen = lock(&screen);
                if screen.closed || screen.view.mode != DisplayMode::Clock {
                    continue;
                }
                if let Err(e) = screen.draw_clock(false) {
                    warn!("clock redraw failed: {:#}", e);
                }
            }
            debug!("clock task stopped");
        });
    }

    /// Stop the clock task and give the terminal back.  Later redraws are
    /// no-ops.
    pub fn close(&self) -> anyhow::Result<()> {
        self.clock.cancel();
        let mut screen = lock(&self.screen);
        if screen.closed {
            return Ok(());
        }
        screen.closed = true;
        execute!(screen.terminal.backend_mut(), LeaveAlternateScreen, Show)?;
        screen.terminal.show_cursor()?;
        Ok(())
    }
}

fn lock(screen: &Mutex<Screen>) -> MutexGuard<'_, Screen> {
    screen.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Screen {
    fn draw_clock(&mut self, force: bool) -> anyhow::Result<()> {
        let text = chrono::Local::now().format(&self.clock_format).to_string();
        if !force && self.last_clock.as_deref() == Some(text.as_str()) {
            return Ok(());
        }
        self.terminal.draw(|frame| render_clock(frame, &text))?;
        self.last_clock = Some(text);
        Ok(())
    }

    fn draw(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        match self.view.mode {
            DisplayMode::Clock => self.draw_clock(true),
            DisplayMode::Playback => {
                let view = &self.view;
                self.terminal.draw(|frame| render_playback(frame, view))?;
                Ok(())
            }
        }
    }
}

fn centered_rows(area: Rect, rows: u16) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(rows),
        Constraint::Fill(1),
    ])
    .areas(area);
    middle
}

fn render_clock(frame: &mut Frame, text: &str) {
    let area = centered_rows(frame.area(), 1);
    frame.render_widget(
        Paragraph::new(Line::styled(text.to_string(), style_clock())).alignment(Alignment::Center),
        area,
    );
}

fn render_playback(frame: &mut Frame, view: &View) {
    let area = centered_rows(frame.area(), 6);
    let [area] = Layout::horizontal([Constraint::Percentage(80)])
        .flex(ratatui::layout::Flex::Center)
        .areas(area);
    let [title, artist, album, _, progress] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(2),
    ])
    .areas(area);

    let title_text = if view.track_number.is_empty() {
        view.title.clone()
    } else {
        format!("{}. {}", view.track_number, view.title)
    };
    let rows = [
        (title, title_text, style_title()),
        (artist, view.artist.clone(), style_secondary()),
        (album, view.album.clone(), style_secondary()),
    ];
    for (row, text, style) in rows {
        frame.render_widget(
            Paragraph::new(Line::styled(text, style)).alignment(Alignment::Center),
            row,
        );
    }

    draw_progress(frame, progress, view.elapsed, view.length);
}

impl Display for TerminalDisplay {
    fn set_mode(&mut self, mode: DisplayMode) {
        let mut screen = lock(&self.screen);
        screen.view.mode = mode;
        // The next clock tick must render even if the minute is unchanged.
        screen.last_clock = None;
    }

    fn set_track_fields(&mut self, title: &str, artist: &str, album: &str, track_number: &str) {
        let mut screen = lock(&self.screen);
        let view = &mut screen.view;
        view.title = title.to_string();
        view.artist = artist.to_string();
        view.album = album.to_string();
        view.track_number = track_number.to_string();
    }

    fn set_track_length(&mut self, duration: f64) {
        lock(&self.screen).view.length = Some(duration);
    }

    fn set_progress(&mut self, elapsed: f64) {
        lock(&self.screen).view.elapsed = elapsed;
    }

    fn redraw(&mut self) -> anyhow::Result<()> {
        lock(&self.screen).draw()
    }
}
