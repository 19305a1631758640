//! Error taxonomy shared by the sync engine and the server client.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server reported a `state` outside play/pause/stop.
    #[error("unknown playback state reported by server: {0:?}")]
    UnknownState(String),

    #[error("missing field in server response: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    /// `ACK` line returned by the server.
    #[error("server error: {0}")]
    Server(String),

    /// `noidle` issued while no idle request was outstanding.
    #[error("no idle request outstanding")]
    NotIdle,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Connection-level failures the caller may recover from by reconnecting.
    /// Everything else points at an incompatible server or a local bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed | Error::Timeout)
    }
}
