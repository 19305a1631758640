//! Shared types for the nowclock workspace: playback snapshots reported by the
//! music server, the transitions derived from them, configuration and paths.

pub mod config;
pub mod error;
pub mod platform;
pub mod status;
pub mod transition;

pub use error::{Error, Result};
pub use status::{DisplayMode, PlaybackState, PlaybackStatus, TrackMetadata};
pub use transition::{diff, Transition};
