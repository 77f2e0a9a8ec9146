use msgbus_core::EnvelopeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid message shape: {0}")]
    InvalidShape(String),

    #[error("Invalid message element: {0}")]
    InvalidElement(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// Operation attempted after the client or endpoint was closed
    #[error("{0} has been closed")]
    Closed(&'static str),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Disconnected")]
    Disconnected,

    #[error("Receive interrupted")]
    Interrupted,

    #[error("{op} failed: {reason}")]
    Transport { op: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{0}")]
    Custom(String),
}

impl From<EnvelopeError> for Error {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::InvalidShape(msg) => Self::InvalidShape(msg),
            EnvelopeError::InvalidElement(msg) => Self::InvalidElement(msg),
            EnvelopeError::Decode(msg) => Self::Decode(msg),
        }
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error came from using a closed client or endpoint
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
