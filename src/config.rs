//! Publisher configuration
//!
//! ```rust,ignore
//! use sse_publisher::config::PublisherConfig;
//!
//! let config = PublisherConfig::builder()
//!     .buffer_capacity(64)
//!     .fallback_thread_name("orders-sse-fallback")
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{PublisherError, Result};

/// Default number of events buffered while the subscriber has no demand.
pub const DEFAULT_BUFFER_CAPACITY: usize = 512;

/// Default name of the emergency thread used when the dispatcher rejects work.
pub const DEFAULT_FALLBACK_THREAD_NAME: &str = "sse-publisher-fallback";

/// Default name for threads spawned by [`crate::dispatch::ThreadDispatcher`].
pub const DEFAULT_READER_THREAD_NAME: &str = "sse-publisher-reader";

/// Configuration shared by an [`crate::source::EventPublisher`] and the
/// channel it creates for its subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Maximum number of undelivered events; the oldest is dropped on overflow.
    pub buffer_capacity: usize,
    /// Name of the thread spawned when the dispatcher rejects the read task.
    pub fallback_thread_name: String,
    /// Name used by the default thread-per-task dispatcher.
    pub reader_thread_name: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            fallback_thread_name: DEFAULT_FALLBACK_THREAD_NAME.to_string(),
            reader_thread_name: DEFAULT_READER_THREAD_NAME.to_string(),
        }
    }
}

impl PublisherConfig {
    /// Create a new builder for PublisherConfig
    pub fn builder() -> PublisherConfigBuilder {
        PublisherConfigBuilder::default()
    }

    /// Check the invariants the channel relies on.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(PublisherError::Config(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.fallback_thread_name.trim().is_empty() {
            return Err(PublisherError::Config(
                "fallback_thread_name must not be empty".to_string(),
            ));
        }
        if self.reader_thread_name.trim().is_empty() {
            return Err(PublisherError::Config(
                "reader_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PublisherConfig
#[derive(Debug, Default)]
pub struct PublisherConfigBuilder {
    buffer_capacity: Option<usize>,
    fallback_thread_name: Option<String>,
    reader_thread_name: Option<String>,
}

impl PublisherConfigBuilder {
    /// Set the buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Set the fallback thread name
    pub fn fallback_thread_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_thread_name = Some(name.into());
        self
    }

    /// Set the reader thread name
    pub fn reader_thread_name(mut self, name: impl Into<String>) -> Self {
        self.reader_thread_name = Some(name.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PublisherConfig> {
        let defaults = PublisherConfig::default();
        let config = PublisherConfig {
            buffer_capacity: self.buffer_capacity.unwrap_or(defaults.buffer_capacity),
            fallback_thread_name: self
                .fallback_thread_name
                .unwrap_or(defaults.fallback_thread_name),
            reader_thread_name: self
                .reader_thread_name
                .unwrap_or(defaults.reader_thread_name),
        };
        config.validate()?;
        Ok(config)
    }
}
