//! Playback-state synchronization: keeps a display in step with a music
//! server by long-polling for player changes and driving two timers.
//!
//! ```text
//!   Engine::start()
//!         │
//!         ├── sync loop task   ← idle "player" → status → diff → dispatch
//!         ├── refresh timer    ← periodic position query while playing
//!         └── inactivity timer ← one-shot switch to the clock view
//! ```
//!
//! All three contexts serialize on a single lock that guards the engine
//! state, the display and the position-query connection.

pub mod client;
pub mod display;
pub mod engine;
pub mod timer;

pub use client::MusicClient;
pub use display::Display;
pub use engine::{ActiveTimerKind, Engine, EngineSettings};
pub use timer::{Timer, TimerMode};
