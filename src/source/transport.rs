//! Blocking pull interface over decoded events.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tokio::runtime::Handle;

use super::event::InboundEvent;
use crate::error::{PublisherError, Result};

/// Pull-based source of decoded events.
///
/// `next_event` may block on I/O. It is never called concurrently, and
/// `close` is called exactly once when the reader stops, whatever the reason.
pub trait EventTransport: Send + 'static {
    /// `Ok(Some)` for the next event, `Ok(None)` at end of stream.
    fn next_event(&mut self) -> Result<Option<InboundEvent>>;

    /// Release the underlying connection.
    fn close(&mut self) {}
}

impl<T: EventTransport + ?Sized> EventTransport for Box<T> {
    fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        (**self).next_event()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Transport over an iterator of already-decoded results.
#[derive(Debug)]
pub struct IterTransport<I> {
    iter: I,
    closed: bool,
}

impl<I> IterTransport<I>
where
    I: Iterator<Item = Result<InboundEvent>> + Send + 'static,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
            closed: false,
        }
    }
}

impl<I> EventTransport for IterTransport<I>
where
    I: Iterator<Item = Result<InboundEvent>> + Send + 'static,
{
    fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        if self.closed {
            return Ok(None);
        }
        self.iter.next().transpose()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<InboundEvent>> + Send>>;

/// Transport decoding a `text/event-stream` byte stream with `eventsource-stream`.
///
/// Accepts any byte stream, e.g. `reqwest::Response::bytes_stream()`. Reads
/// block the calling thread; when created inside a tokio runtime the runtime
/// handle is captured and used to drive the stream.
pub struct SseTransport {
    events: EventStream,
    handle: Option<Handle>,
    closed: bool,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("has_runtime", &self.handle.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SseTransport {
    pub fn new<S, B, E>(bytes: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let events = bytes.eventsource().map(|item| {
            item.map(InboundEvent::from)
                .map_err(|e| PublisherError::transport(format!("SSE parsing error: {e}")))
        });
        Self {
            events: Box::pin(events),
            handle: Handle::try_current().ok(),
            closed: false,
        }
    }

    /// Drive the stream on `handle` instead of the one captured at creation.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl EventTransport for SseTransport {
    fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        if self.closed {
            return Ok(None);
        }
        let next = self.events.next();
        let item = match &self.handle {
            Some(handle) => handle.block_on(next),
            None => futures::executor::block_on(next),
        };
        item.transpose()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            // Dropping the byte stream releases the connection.
            self.events = Box::pin(futures::stream::empty());
        }
    }
}
