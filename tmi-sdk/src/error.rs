//! Error types.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors returned by client operations.
///
/// Malformed inbound lines are not errors; they are dropped by the codec.
/// Server-reported failures arrive as [`Event::Notice`](crate::event::Event::Notice)
/// rather than through this type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected to the server")]
    NotConnected,

    #[error("already connected or connecting")]
    AlreadyConnected,

    #[error("cannot send messages as an anonymous user")]
    Anonymous,

    #[error("cannot send a whisper to the same account")]
    WhisperToSelf,

    #[error("a reply needs the id of the parent message")]
    MissingReplyParent,

    #[error("invalid server url {0:?}")]
    InvalidUrl(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Transport(#[from] tungstenite::Error),
}

impl ClientError {
    /// Whether the error came from the caller misusing the API rather than
    /// from the network.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected
                | ClientError::AlreadyConnected
                | ClientError::Anonymous
                | ClientError::WhisperToSelf
                | ClientError::MissingReplyParent
        )
    }
}

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
