use crate::status::{PlaybackState, PlaybackStatus};

/// A discrete playback event derived from two consecutive status snapshots.
/// Each variant carries the elapsed position of the newer snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Started(f64),
    Ended(f64),
    Resumed(f64),
    Paused(f64),
    Seeked(f64),
}

impl Transition {
    pub fn elapsed(&self) -> f64 {
        match *self {
            Transition::Started(e)
            | Transition::Ended(e)
            | Transition::Resumed(e)
            | Transition::Paused(e)
            | Transition::Seeked(e) => e,
        }
    }
}

/// Classify the change between `old` and `new`.
///
/// Order matters: a new song id wins over any state change in the same
/// cycle, and a state change wins over a bare position change.  A
/// `stopped -> playing` change on the same song is `Resumed`.
pub fn diff(old: &PlaybackStatus, new: &PlaybackStatus) -> Option<Transition> {
    let elapsed = new.elapsed;

    if let Some(id) = &new.song_id {
        if old.song_id.as_ref() != Some(id) {
            return Some(Transition::Started(elapsed));
        }
    }

    if old.state != new.state {
        return Some(match new.state {
            PlaybackState::Stopped => Transition::Ended(elapsed),
            PlaybackState::Playing => Transition::Resumed(elapsed),
            PlaybackState::Paused => Transition::Paused(elapsed),
        });
    }

    if old.elapsed != new.elapsed {
        return Some(Transition::Seeked(elapsed));
    }

    None
}
