//! Event Source Adapter
//!
//! [`EventPublisher`] owns an [`EventTransport`] and, once subscribed, pulls
//! events from it on a background task, projects each one into the
//! subscriber's element type and pushes it into a
//! [`BackpressureChannel`](crate::channel::BackpressureChannel).
//!
//! ```rust,ignore
//! use sse_publisher::prelude::*;
//!
//! let transport = SseTransport::new(response.bytes_stream());
//! let publisher = EventPublisher::<Json<Tick>>::new(transport, PublisherConfig::default())?;
//! let mut ticks = SubscriberStream::new(&publisher, 16);
//! while let Some(tick) = ticks.next().await {
//!     println!("{:?}", tick?);
//! }
//! ```

mod event;
mod transport;

pub use event::{FromEvent, InboundEvent, Json};
pub use transport::{EventTransport, IterTransport, SseTransport};

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::channel::BackpressureChannel;
use crate::config::PublisherConfig;
use crate::dispatch::{TaskDispatcher, ThreadDispatcher, dispatch_with_fallback};
use crate::error::{PublisherError, Result};
use crate::flow::{Publisher, Subscriber};

/// Single-subscriber publisher over an event transport.
pub struct EventPublisher<T> {
    transport: Mutex<Option<Box<dyn EventTransport>>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: PublisherConfig,
    _element: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for EventPublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("dispatcher", &self.dispatcher.name())
            .field("config", &self.config)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl<T: FromEvent> EventPublisher<T> {
    /// Create a publisher that reads on a [`ThreadDispatcher`] thread.
    pub fn new<Tr>(transport: Tr, config: PublisherConfig) -> Result<Self>
    where
        Tr: EventTransport,
    {
        config.validate()?;
        let dispatcher = Arc::new(ThreadDispatcher::new(config.reader_thread_name.clone()));
        Ok(Self {
            transport: Mutex::new(Some(Box::new(transport))),
            dispatcher,
            config,
            _element: PhantomData,
        })
    }

    /// Run the read loop on `dispatcher` instead.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }
}

impl<T> EventPublisher<T> {
    /// Whether the transport has been handed to a subscriber.
    pub fn is_subscribed(&self) -> bool {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T: FromEvent> Publisher<T> for EventPublisher<T> {
    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T>,
    {
        // Capacity was validated in `new`, so this only fails for a config
        // that bypassed validation.
        let channel = match BackpressureChannel::subscribe(subscriber, self.config.buffer_capacity) {
            Ok(channel) => channel,
            Err(err) => {
                tracing::error!(error = %err, "cannot create subscription channel");
                return;
            }
        };

        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(transport) = transport else {
            tracing::warn!(subscription_id = %channel.id(), "rejecting second subscriber");
            channel.fail(PublisherError::AlreadySubscribed);
            return;
        };

        let stop = CancellationToken::new();
        {
            let stop = stop.clone();
            channel.on_termination(move || stop.cancel());
        }

        let reader = ReadLoop {
            transport: CloseOnDrop(transport),
            channel: channel.clone(),
            stop,
        };
        if let Err(err) = dispatch_with_fallback(
            self.dispatcher.as_ref(),
            Box::new(move || reader.run()),
            &self.config.fallback_thread_name,
        ) {
            channel.fail(err);
        }
    }
}

/// Closes the transport exactly once when the reader goes away.
struct CloseOnDrop(Box<dyn EventTransport>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct ReadLoop<T: FromEvent> {
    transport: CloseOnDrop,
    channel: Arc<BackpressureChannel<T>>,
    stop: CancellationToken,
}

impl<T: FromEvent> Drop for ReadLoop<T> {
    // Every normal exit has already terminated or cancelled the channel, which
    // makes this a no-op. It only lands when the task was discarded unrun or
    // the reader is unwinding.
    fn drop(&mut self) {
        let cause = if std::thread::panicking() {
            PublisherError::transport("read loop panicked")
        } else {
            PublisherError::TaskRejected("read task was dropped before it finished".to_string())
        };
        self.channel.fail(cause);
    }
}

/// Run the projection, turning a panic into a decode failure.
fn project<T: FromEvent>(event: InboundEvent) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(|| T::from_event(event)))
        .unwrap_or_else(|_| Err(PublisherError::decode("event projection panicked")))
}

impl<T: FromEvent> ReadLoop<T> {
    fn run(mut self) {
        let span = tracing::debug_span!("sse_read_loop", subscription_id = %self.channel.id());
        let _enter = span.enter();

        loop {
            // Cancellation is cooperative: a read already in flight finishes
            // first, but its result is never delivered.
            if self.stop.is_cancelled() {
                tracing::debug!("read loop stopped after cancellation");
                return;
            }

            let transport = &mut self.transport.0;
            let next = panic::catch_unwind(AssertUnwindSafe(|| transport.next_event()))
                .unwrap_or_else(|_| Err(PublisherError::transport("transport panicked")));

            match next {
                Ok(Some(event)) => match project::<T>(event) {
                    Ok(item) => self.channel.buffer(item),
                    Err(err) => {
                        tracing::debug!(error = %err, "event projection failed");
                        self.channel.fail(err);
                        return;
                    }
                },
                Ok(None) => {
                    tracing::debug!("transport exhausted");
                    self.channel.complete();
                    return;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "transport failed");
                    self.channel.fail(err);
                    return;
                }
            }
        }
    }
}
