use std::io;
use thiserror::Error;

/// Result type for jitter buffer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for jitter buffer operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// RTP/RTCP packet error
    #[error("RTP error: {0}")]
    Rtp(#[from] vjitter_rtp_core::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A feedback message could not be sent
    #[error("Feedback error: {0}")]
    Feedback(String),

    /// Channel to a consumer is full
    #[error("Channel full")]
    ChannelFull,

    /// Channel to a consumer is closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for Error {
    fn from(err: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(_) => Error::ChannelFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        }
    }
}
