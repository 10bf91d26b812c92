use thiserror::Error;

/// Errors produced by the nrelay protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The peer or the local side already closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Returned by store implementations when an event cannot be persisted.
    #[error("storage error: {0}")]
    Storage(String),

    /// Policy rejection; the message is sent to the client as-is.
    #[error("{0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<hex::FromHexError> for RelayError {
    fn from(e: hex::FromHexError) -> Self {
        RelayError::Codec(e.to_string())
    }
}

impl From<secp256k1::Error> for RelayError {
    fn from(e: secp256k1::Error) -> Self {
        RelayError::Verification(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
