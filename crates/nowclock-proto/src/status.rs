use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Player state as reported by the server's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl FromStr for PlaybackState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(PlaybackState::Stopped),
            "play" => Ok(PlaybackState::Playing),
            "pause" => Ok(PlaybackState::Paused),
            other => Err(Error::UnknownState(other.to_string())),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Stopped => "stop",
            PlaybackState::Playing => "play",
            PlaybackState::Paused => "pause",
        };
        f.write_str(s)
    }
}

/// One `status` snapshot.  Superseded by the next query, never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Opaque server-side id of the current song, absent when the queue is empty.
    pub song_id: Option<String>,
    pub elapsed: f64,
}

impl PlaybackStatus {
    /// Build a snapshot from `key: value` pairs.  `state` is required; a
    /// missing `elapsed` reads as 0 (the server omits it while stopped).
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = None;
        let mut song_id = None;
        let mut elapsed = 0.0;

        for (key, value) in pairs {
            match key {
                "state" => state = Some(value.parse::<PlaybackState>()?),
                "songid" => song_id = Some(value.to_string()),
                "elapsed" => elapsed = parse_seconds("elapsed", value)?,
                _ => {}
            }
        }

        Ok(Self {
            state: state.ok_or(Error::MissingField("state"))?,
            song_id,
            elapsed,
        })
    }

    pub fn is_active(&self) -> bool {
        self.song_id.is_some()
    }
}

/// Metadata of the current song, fetched once per song id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_number: String,
    pub duration: f64,
}

impl TrackMetadata {
    /// Build from a `currentsong` response.  Text tags default to empty; the
    /// duration is required because the progress bar is scaled by it.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut meta = TrackMetadata {
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            track_number: String::new(),
            duration: 0.0,
        };
        let mut duration = None;
        let mut legacy_time = None;

        for (key, value) in pairs {
            match key {
                "Title" => meta.title = value.to_string(),
                "Artist" => meta.artist = value.to_string(),
                "Album" => meta.album = value.to_string(),
                "Track" => meta.track_number = value.to_string(),
                "duration" => duration = Some(value),
                "Time" => legacy_time = Some(value),
                _ => {}
            }
        }

        let raw = duration
            .or(legacy_time)
            .ok_or(Error::MissingField("duration"))?;
        let secs = parse_seconds("duration", raw)?;
        if secs <= 0.0 {
            return Err(Error::InvalidValue {
                field: "duration",
                value: raw.to_string(),
            });
        }
        meta.duration = secs;
        Ok(meta)
    }
}

/// The view currently shown on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Clock,
    Playback,
}

fn parse_seconds(field: &'static str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(Error::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}
