#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nowclock_proto::{
    DisplayMode, Error, PlaybackState, PlaybackStatus, Result, TrackMetadata,
};
use nowclock_sync::{Display, EngineSettings, MusicClient};
use tokio::sync::watch;

pub const REFRESH: Duration = Duration::from_millis(100);
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Connection numbers in `connect` order; `Engine::start` takes the loop
/// connection first.
pub const LOOP_CONN: usize = 0;
pub const POSITION_CONN: usize = 1;

pub fn settings() -> EngineSettings {
    EngineSettings {
        refresh_interval: REFRESH,
        inactivity_timeout: TIMEOUT,
    }
}

/// Let spawned tasks run until they park, without reaching any timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn status(state: PlaybackState, song: Option<&str>, elapsed: f64) -> PlaybackStatus {
    PlaybackStatus {
        state,
        song_id: song.map(str::to_string),
        elapsed,
    }
}

pub fn stopped() -> PlaybackStatus {
    status(PlaybackState::Stopped, None, 0.0)
}

pub fn playing(song: &str, elapsed: f64) -> PlaybackStatus {
    status(PlaybackState::Playing, Some(song), elapsed)
}

pub fn paused(song: &str, elapsed: f64) -> PlaybackStatus {
    status(PlaybackState::Paused, Some(song), elapsed)
}

pub fn track(title: &str, duration: f64) -> TrackMetadata {
    TrackMetadata {
        title: title.to_string(),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        track_number: "1".to_string(),
        duration,
    }
}

// ── fake music server ─────────────────────────────────────────────────────────

struct ServerState {
    status: PlaybackStatus,
    /// Overrides the state field with a value outside play/pause/stop.
    bogus_state: Option<String>,
    songs: HashMap<String, TrackMetadata>,
    fail_metadata: bool,
    commands: Vec<String>,
    connections: usize,
    /// Connections the server has hung up on.
    dropped: HashSet<usize>,
}

/// In-memory server shared by any number of client connections.  `publish`
/// changes the status and wakes every connection waiting in idle.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl FakeServer {
    pub fn new(initial: PlaybackStatus) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(ServerState {
                status: initial,
                bogus_state: None,
                songs: HashMap::new(),
                fail_metadata: false,
                commands: Vec::new(),
                connections: 0,
                dropped: HashSet::new(),
            })),
            changes: Arc::new(tx),
        }
    }

    pub fn with_song(self, id: &str, meta: TrackMetadata) -> Self {
        self.state.lock().unwrap().songs.insert(id.to_string(), meta);
        self
    }

    pub fn connect(&self) -> FakeClient {
        let conn = {
            let mut state = self.state.lock().unwrap();
            state.connections += 1;
            state.connections - 1
        };
        FakeClient {
            conn,
            server: self.clone(),
            changes: self.changes.subscribe(),
            idling: false,
        }
    }

    /// Change the status silently, like playback position advancing.
    pub fn set_status(&self, status: PlaybackStatus) {
        self.state.lock().unwrap().status = status;
    }

    /// Change the status and notify idle subscribers.
    pub fn publish(&self, status: PlaybackStatus) {
        self.set_status(status);
        self.notify();
    }

    pub fn publish_bogus_state(&self, state: &str) {
        self.state.lock().unwrap().bogus_state = Some(state.to_string());
        self.notify();
    }

    /// Hang up on one connection; its later requests fail with
    /// `ConnectionClosed`.
    pub fn drop_connection(&self, conn: usize) {
        self.state.lock().unwrap().dropped.insert(conn);
    }

    pub fn fail_metadata(&self) {
        self.state.lock().unwrap().fail_metadata = true;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v += 1);
    }

    fn record(&self, command: &str) {
        self.state.lock().unwrap().commands.push(command.to_string());
    }
}

pub struct FakeClient {
    conn: usize,
    server: FakeServer,
    changes: watch::Receiver<u64>,
    idling: bool,
}

#[async_trait]
impl MusicClient for FakeClient {
    async fn status(&mut self) -> Result<PlaybackStatus> {
        self.server.record("status");
        let state = self.server.state.lock().unwrap();
        if state.dropped.contains(&self.conn) {
            return Err(Error::ConnectionClosed);
        }
        if let Some(bogus) = &state.bogus_state {
            return Err(Error::UnknownState(bogus.clone()));
        }
        Ok(state.status.clone())
    }

    async fn current_song(&mut self) -> Result<TrackMetadata> {
        self.server.record("currentsong");
        let state = self.server.state.lock().unwrap();
        if state.fail_metadata {
            return Err(Error::ConnectionClosed);
        }
        let id = state
            .status
            .song_id
            .clone()
            .ok_or(Error::MissingField("songid"))?;
        state
            .songs
            .get(&id)
            .cloned()
            .ok_or(Error::MissingField("duration"))
    }

    async fn send_idle(&mut self, subsystem: &str) -> Result<()> {
        self.server.record(&format!("idle {}", subsystem));
        self.idling = true;
        Ok(())
    }

    async fn fetch_idle(&mut self) -> Result<Vec<String>> {
        self.changes
            .changed()
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        self.idling = false;
        Ok(vec!["player".to_string()])
    }

    async fn noidle(&mut self) -> Result<()> {
        if !self.idling {
            return Err(Error::NotIdle);
        }
        self.server.record("noidle");
        self.idling = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.server.record("close");
        Ok(())
    }
}

// ── recording display ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Mode(DisplayMode),
    Fields(String),
    Length(f64),
    Progress(f64),
    Redraw,
}

#[derive(Clone, Default)]
pub struct RecordingDisplay {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_redraws: Arc<AtomicBool>,
}

impl RecordingDisplay {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Make every later `redraw` fail, like a terminal that went away.
    pub fn fail_redraws(&self) {
        self.fail_redraws.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Display for RecordingDisplay {
    fn set_mode(&mut self, mode: DisplayMode) {
        self.push(Call::Mode(mode));
    }

    fn set_track_fields(&mut self, title: &str, _artist: &str, _album: &str, _track_number: &str) {
        self.push(Call::Fields(title.to_string()));
    }

    fn set_track_length(&mut self, duration: f64) {
        self.push(Call::Length(duration));
    }

    fn set_progress(&mut self, elapsed: f64) {
        self.push(Call::Progress(elapsed));
    }

    fn redraw(&mut self) -> anyhow::Result<()> {
        self.push(Call::Redraw);
        if self.fail_redraws.load(Ordering::SeqCst) {
            anyhow::bail!("terminal gone");
        }
        Ok(())
    }
}
