//! Sync engine: the long-poll loop plus the refresh and inactivity timers.
//!
//! The engine owns two server connections.  The loop connection sits in
//! `idle player` most of the time; the position connection answers the
//! refresh timer's `status` queries.  Engine state, the display, the position
//! connection and the active-timer slot live behind one `tokio::sync::Mutex`:
//! a transition or a timer tick holds it for its whole side effect, so the
//! display never renders a half-applied update.
//!
//! Timer discipline: at most one timer is alive.  The slot holds either the
//! refresh timer (playing) or the inactivity timer (paused / stopped), and
//! starting one stops the other first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use nowclock_proto::config::SyncConfig;
use nowclock_proto::{
    diff, DisplayMode, Error, PlaybackState, PlaybackStatus, TrackMetadata, Transition,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{MusicClient, PLAYER_SUBSYSTEM};
use crate::display::Display;
use crate::timer::{Timer, TimerMode};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub refresh_interval: Duration,
    pub inactivity_timeout: Duration,
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs_f64(config.refresh_interval_secs),
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs),
        }
    }
}

/// Which timer currently occupies the slot and is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTimerKind {
    Refresh,
    Inactivity,
}

// ── timer slot ────────────────────────────────────────────────────────────────

enum ActiveTimer {
    None,
    Refresh(Timer),
    Inactivity(Timer),
}

impl ActiveTimer {
    async fn stop(&mut self) {
        match std::mem::replace(self, ActiveTimer::None) {
            ActiveTimer::None => {}
            ActiveTimer::Refresh(t) | ActiveTimer::Inactivity(t) => t.stop().await,
        }
    }

    fn running(&self) -> Option<ActiveTimerKind> {
        match self {
            ActiveTimer::Refresh(t) if t.is_running() => Some(ActiveTimerKind::Refresh),
            ActiveTimer::Inactivity(t) if t.is_running() => Some(ActiveTimerKind::Inactivity),
            _ => None,
        }
    }
}

// ── shared state ──────────────────────────────────────────────────────────────

struct EngineState {
    mode: DisplayMode,
    last_status: PlaybackStatus,
    track: Option<TrackMetadata>,
    /// Last progress value pushed to the display.
    position: f64,
}

struct Shared<C, D> {
    state: EngineState,
    display: D,
    position_client: C,
    timer: ActiveTimer,
    settings: EngineSettings,
    /// Handed to timer callbacks so a dropped engine ends them.
    self_ref: Weak<Mutex<Shared<C, D>>>,
    /// Cancelled by a timer tick that loses its connection, ending the loop.
    shutdown: CancellationToken,
    /// Error that ended the session from outside the loop.
    fault: Option<anyhow::Error>,
}

impl<C: MusicClient, D: Display> Shared<C, D> {
    fn switch_mode(&mut self, mode: DisplayMode) {
        if self.state.mode != mode {
            info!("display: {:?} -> {:?}", self.state.mode, mode);
            self.display.set_mode(mode);
            self.state.mode = mode;
        }
    }

    fn show_track(&mut self, track: TrackMetadata) {
        self.display
            .set_track_fields(&track.title, &track.artist, &track.album, &track.track_number);
        self.display.set_track_length(track.duration);
        self.state.track = Some(track);
    }

    /// Push a position to the display.  Unforced pushes of an unchanged
    /// position are dropped to avoid redundant redraws.
    fn push_progress(&mut self, elapsed: f64, force: bool) -> anyhow::Result<()> {
        if force || elapsed != self.state.position {
            self.state.position = elapsed;
            self.display.set_progress(elapsed);
            self.display.redraw().context("display redraw failed")?;
        }
        Ok(())
    }

    async fn start_refresh(&mut self) {
        self.timer.stop().await;
        let weak = self.self_ref.clone();
        let timer = Timer::start(
            "refresh",
            self.settings.refresh_interval,
            TimerMode::Repeating,
            move || refresh_tick(weak.clone()),
        );
        self.timer = ActiveTimer::Refresh(timer);
    }

    async fn stop_refresh(&mut self) {
        if matches!(self.timer, ActiveTimer::Refresh(_)) {
            self.timer.stop().await;
        }
    }

    /// Start the inactivity countdown unless one is already running; a pause
    /// followed by a stop keeps counting from the pause.
    async fn start_inactivity(&mut self) {
        if self.timer.running() == Some(ActiveTimerKind::Inactivity) {
            return;
        }
        self.timer.stop().await;
        let weak = self.self_ref.clone();
        let timer = Timer::start(
            "inactivity",
            self.settings.inactivity_timeout,
            TimerMode::OneShot,
            move || inactivity_tick(weak.clone()),
        );
        self.timer = ActiveTimer::Inactivity(timer);
    }

    /// Stop the inactivity countdown and bring the playback view back if the
    /// countdown already reverted to the clock.
    async fn cancel_inactivity(&mut self) {
        if matches!(self.timer, ActiveTimer::Inactivity(_)) {
            self.timer.stop().await;
        }
        self.switch_mode(DisplayMode::Playback);
    }

    /// Apply one transition.  `track` must be the freshly fetched metadata for
    /// a `Started` transition; it is fetched before the lock is taken so a
    /// failed query leaves state untouched.  A failed redraw does not cut the
    /// table short: state and timers are fully updated before it is returned.
    async fn apply(
        &mut self,
        transition: Transition,
        status: &PlaybackStatus,
        track: Option<TrackMetadata>,
    ) -> anyhow::Result<()> {
        info!("transition: {:?} (state={})", transition, status.state);
        let elapsed = transition.elapsed();

        let drawn = match transition {
            Transition::Started(_) => {
                let track = track.context("missing metadata for started song")?;
                self.cancel_inactivity().await;
                self.stop_refresh().await;
                self.show_track(track);
                let drawn = self.push_progress(elapsed, true);
                if status.state == PlaybackState::Playing {
                    self.start_refresh().await;
                } else {
                    self.start_inactivity().await;
                }
                drawn
            }
            Transition::Ended(_) | Transition::Paused(_) => {
                self.start_inactivity().await;
                self.push_progress(elapsed, true)
            }
            Transition::Resumed(_) => {
                self.cancel_inactivity().await;
                let drawn = self.push_progress(elapsed, true);
                self.start_refresh().await;
                drawn
            }
            Transition::Seeked(_) => {
                self.stop_refresh().await;
                let drawn = self.push_progress(elapsed, true);
                if status.state == PlaybackState::Playing {
                    self.start_refresh().await;
                }
                drawn
            }
        };

        self.state.last_status = status.clone();
        drawn
    }
}

/// One position refresh.
///
/// The engine lock is held across the query, so a transition or `stop` may
/// wait up to one request timeout behind it.  Releasing the lock instead
/// would let `stop` abandon the request halfway and leave the position
/// connection out of step with its replies.
///
/// A lost connection ends the session: the error is parked in `fault` and
/// the loop is told to shut down, so the caller sees it and reconnects.
async fn refresh_tick<C: MusicClient, D: Display>(
    shared: Weak<Mutex<Shared<C, D>>>,
) -> anyhow::Result<()> {
    let shared = shared.upgrade().context("engine dropped")?;
    let mut guard = shared.lock().await;
    let status = match guard.position_client.status().await {
        Ok(status) => status,
        Err(e) if e.is_transient() => {
            let err = anyhow::Error::new(e).context("position query failed");
            error!("{:#}; ending session", err);
            guard.fault = Some(err);
            guard.shutdown.cancel();
            anyhow::bail!("position connection lost");
        }
        Err(e) => return Err(anyhow::Error::new(e).context("position query failed")),
    };
    guard.push_progress(status.elapsed, false)
}

async fn inactivity_tick<C: MusicClient, D: Display>(
    shared: Weak<Mutex<Shared<C, D>>>,
) -> anyhow::Result<()> {
    let shared = shared.upgrade().context("engine dropped")?;
    let mut guard = shared.lock().await;
    info!("inactivity timeout reached");
    guard.switch_mode(DisplayMode::Clock);
    guard.display.redraw().context("display redraw failed")
}

// ── sync loop ─────────────────────────────────────────────────────────────────

async fn run_loop<C: MusicClient, D: Display>(
    client: &mut C,
    shared: &Arc<Mutex<Shared<C, D>>>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    {
        let mut guard = shared.lock().await;
        guard.display.set_mode(DisplayMode::Clock);
        guard.state.mode = DisplayMode::Clock;
        guard.display.redraw().context("display redraw failed")?;
    }

    // Reflect whatever is already playing instead of waiting for the first
    // change notification.
    let mut status = client.status().await.context("initial status query failed")?;
    if status.is_active() {
        let track = client
            .current_song()
            .await
            .context("initial metadata query failed")?;
        let mut guard = shared.lock().await;
        guard
            .apply(Transition::Started(status.elapsed), &status, Some(track))
            .await?;
    } else {
        shared.lock().await.state.last_status = status.clone();
    }

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        client
            .send_idle(PLAYER_SUBSYSTEM)
            .await
            .context("idle request failed")?;

        let changed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                interrupt_idle(client).await;
                break;
            }
            changed = client.fetch_idle() => changed.context("idle request failed")?,
        };
        debug!("idle: changed {:?}", changed);

        let next = client.status().await.context("status query failed")?;
        if let Some(transition) = diff(&status, &next) {
            let track = match transition {
                Transition::Started(_) => Some(
                    client
                        .current_song()
                        .await
                        .context("metadata query failed")?,
                ),
                _ => None,
            };
            shared.lock().await.apply(transition, &next, track).await?;
        }
        status = next;
    }

    info!("sync loop: shutdown requested");
    Ok(())
}

/// Send `noidle` so a blocked idle returns now rather than at the next event.
async fn interrupt_idle<C: MusicClient>(client: &mut C) {
    match client.noidle().await {
        Ok(()) => debug!("idle interrupted"),
        Err(Error::NotIdle) => debug!("noidle with no idle outstanding"),
        Err(e) => warn!("noidle failed: {}", e),
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Running synchronization engine.  Dropping it without `stop` requests
/// shutdown but does not wait for it.
pub struct Engine<C: MusicClient, D: Display> {
    shared: Arc<Mutex<Shared<C, D>>>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<(C, anyhow::Result<()>)>,
}

impl<C: MusicClient, D: Display> Engine<C, D> {
    /// Spawn the sync loop.  Must be called from within a tokio runtime.
    pub fn start(loop_client: C, position_client: C, display: D, settings: EngineSettings) -> Self {
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();

        let shared = Arc::new_cyclic(|weak| {
            Mutex::new(Shared {
                state: EngineState {
                    mode: DisplayMode::Clock,
                    last_status: PlaybackStatus::default(),
                    track: None,
                    position: 0.0,
                },
                display,
                position_client,
                timer: ActiveTimer::None,
                settings,
                self_ref: weak.clone(),
                shutdown: shutdown.clone(),
                fault: None,
            })
        });

        let task_shared = shared.clone();
        let task_shutdown = shutdown.clone();
        let task_finished = finished.clone();
        let mut client = loop_client;
        let task = tokio::spawn(async move {
            info!("sync loop: starting");
            let mut outcome = run_loop(&mut client, &task_shared, &task_shutdown).await;
            if outcome.is_ok() {
                if let Some(fault) = task_shared.lock().await.fault.take() {
                    outcome = Err(fault);
                }
            }
            if let Err(e) = &outcome {
                error!("sync loop terminated: {:#}", e);
            }
            drop(task_shared);
            task_finished.cancel();
            (client, outcome)
        });

        Self {
            shared,
            shutdown,
            finished,
            task,
        }
    }

    /// Resolves once the sync loop has exited, whether by error or by `stop`.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub async fn mode(&self) -> DisplayMode {
        self.shared.lock().await.state.mode
    }

    pub async fn active_timer(&self) -> Option<ActiveTimerKind> {
        self.shared.lock().await.timer.running()
    }

    pub async fn last_status(&self) -> PlaybackStatus {
        self.shared.lock().await.state.last_status.clone()
    }

    pub async fn track(&self) -> Option<TrackMetadata> {
        self.shared.lock().await.state.track.clone()
    }

    /// Shut down: end the loop (interrupting an outstanding idle), wait for
    /// it, stop the active timer and close both connections.  No display
    /// update happens after this returns.  Returns the loop's outcome, or the
    /// refresh error that ended the session.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();

        let (loop_client, outcome) = match (&mut self.task).await {
            Ok((client, outcome)) => (Some(client), outcome),
            Err(e) => (None, Err(anyhow::anyhow!("sync loop task failed: {}", e))),
        };

        let mut guard = self.shared.lock().await;
        guard.timer.stop().await;

        if let Some(mut client) = loop_client {
            if let Err(e) = client.close().await {
                debug!("closing loop connection: {}", e);
            }
        }
        if let Err(e) = guard.position_client.close().await {
            debug!("closing position connection: {}", e);
        }
        info!("engine stopped");
        outcome
    }
}

impl<C: MusicClient, D: Display> Drop for Engine<C, D> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
