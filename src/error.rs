//! Error Handling Module
//!
//! A single error type flows through the whole crate: the producer uses it to
//! fail a stream, the consumer receives it in `on_error`, and configuration and
//! telemetry setup report through it as well.
//!
//! # Example
//!
//! ```rust,ignore
//! use sse_publisher::error::PublisherError;
//!
//! let error = PublisherError::InvalidRequest(0);
//! assert!(error.is_protocol_violation());
//! assert_eq!(error.to_string(), "Request must be positive, but was 0");
//! ```

use thiserror::Error;

/// Errors surfaced by publishers, channels and their collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublisherError {
    /// The subscriber asked for a non-positive number of items.
    #[error("Request must be positive, but was {0}")]
    InvalidRequest(i64),

    /// A failure was signalled without a cause.
    #[error("The received error is missing its cause")]
    MissingCause,

    /// The publisher only supports a single subscriber.
    #[error("Publisher already has a subscriber")]
    AlreadySubscribed,

    /// The underlying transport failed while reading.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An event could not be projected into the requested element type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The subscriber rejected an item.
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Neither the dispatcher nor the fallback thread accepted the read task.
    #[error("Task rejected: {0}")]
    TaskRejected(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry initialization error
    #[error("Telemetry initialization error: {0}")]
    TelemetryInit(String),
}

impl PublisherError {
    /// Create a transport error from anything displayable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create a decode error from anything displayable.
    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }

    /// Create a consumer error from anything displayable.
    pub fn consumer(message: impl std::fmt::Display) -> Self {
        Self::Consumer(message.to_string())
    }

    /// Whether this error reports a broken reactive-streams contract rather
    /// than a failure of the data source.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::MissingCause | Self::AlreadySubscribed
        )
    }
}

impl From<serde_json::Error> for PublisherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;
