use async_trait::async_trait;
use nowclock_proto::{PlaybackStatus, Result, TrackMetadata};

/// Subsystem the sync loop long-polls on.
pub const PLAYER_SUBSYSTEM: &str = "player";

/// One connection to the music server.
///
/// Each connection is owned by a single task; the engine opens one for the
/// sync loop and one for position queries so the idle long-poll never sits
/// in front of another request on the same socket.
#[async_trait]
pub trait MusicClient: Send + 'static {
    async fn status(&mut self) -> Result<PlaybackStatus>;

    async fn current_song(&mut self) -> Result<TrackMetadata>;

    /// Enter idle mode for `subsystem` without waiting for the answer.
    async fn send_idle(&mut self, subsystem: &str) -> Result<()>;

    /// Wait for the answer to `send_idle` and return the changed subsystems.
    ///
    /// Must be cancel-safe: the loop races it against shutdown and then calls
    /// `noidle` on the same connection.
    async fn fetch_idle(&mut self) -> Result<Vec<String>>;

    /// Interrupt an outstanding idle request.  Returns `Error::NotIdle` when
    /// nothing was outstanding; callers treat that as benign.
    async fn noidle(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    /// Block until `subsystem` reports a change.
    async fn idle(&mut self, subsystem: &str) -> Result<Vec<String>> {
        self.send_idle(subsystem).await?;
        self.fetch_idle().await
    }
}
