use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    /// Top-level value is not an object, a blob, or an `[object, blob]` pair
    #[error("Invalid envelope shape: {0}")]
    InvalidShape(String),

    /// A nested value cannot be carried inside a message body
    #[error("Invalid envelope element: {0}")]
    InvalidElement(String),

    #[error("Failed to decode envelope: {0}")]
    Decode(String),
}

impl EnvelopeError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }

    pub fn element(msg: impl Into<String>) -> Self {
        Self::InvalidElement(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
