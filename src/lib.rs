//! # sse-publisher
//!
//! Delivers server-sent events to a single subscriber under pull-based
//! backpressure. The subscriber states how many events it can take through
//! [`Subscription::request`]; events that arrive before it is ready are held
//! in a bounded buffer that drops the oldest entry on overflow.
//!
//! - [`channel`]: the backpressure engine (buffer, demand counter, drain loop)
//! - [`source`]: the publisher that reads an event transport on a background task
//! - [`dispatch`]: background task submission with a fallback thread
//! - [`stream`]: a `futures::Stream` view over any publisher
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use sse_publisher::prelude::*;
//!
//! let transport = SseTransport::new(response.bytes_stream());
//! let publisher = EventPublisher::<InboundEvent>::new(transport, PublisherConfig::default())?;
//! let mut events = SubscriberStream::new(&publisher, 32);
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.name, event.data);
//! }
//! ```
#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod source;
pub mod stream;
pub mod telemetry;

pub use error::{PublisherError, Result};
pub use flow::{Publisher, Subscriber, Subscription};

/// Commonly used types.
pub mod prelude {
    pub use crate::channel::{BackpressureChannel, ChannelStats};
    pub use crate::config::PublisherConfig;
    pub use crate::dispatch::{BlockingDispatcher, TaskDispatcher, ThreadDispatcher};
    pub use crate::error::{PublisherError, Result};
    pub use crate::flow::{Publisher, Subscriber, Subscription};
    pub use crate::source::{
        EventPublisher, EventTransport, FromEvent, InboundEvent, IterTransport, Json, SseTransport,
    };
    pub use crate::stream::SubscriberStream;
}
