//! Reactive-stream contracts
//!
//! A [`Publisher`] hands each [`Subscriber`] a [`Subscription`] through which
//! the subscriber declares demand. Signals to a subscriber are always
//! serialized: `on_subscribe` first, then any number of `on_next` bounded by
//! the demand granted so far, then at most one of `on_complete` / `on_error`.

pub mod demand;

use std::sync::Arc;

use crate::error::PublisherError;

/// A source of items delivered under subscriber-controlled demand.
pub trait Publisher<T> {
    /// Attach a subscriber. The subscriber always receives `on_subscribe`,
    /// even when the publisher cannot serve it; in that case an `on_error`
    /// follows immediately.
    fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T>;
}

/// The consumer side of a stream.
///
/// Calls are never concurrent. Returning an error from `on_next` (or
/// panicking inside it) cancels the subscription; no further signals follow.
pub trait Subscriber<T>: Send + 'static {
    /// Receives the handle used to request items or cancel.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// Receives the next item.
    fn on_next(&mut self, item: T) -> Result<(), PublisherError>;

    /// Terminal failure signal.
    fn on_error(&mut self, error: PublisherError);

    /// Terminal completion signal.
    fn on_complete(&mut self);
}

/// Demand and cancellation handle given to a subscriber.
pub trait Subscription: Send + Sync {
    /// Authorize `n` more items. A non-positive `n` cancels the subscription
    /// and is reported to the subscriber through `on_error`.
    fn request(&self, n: i64);

    /// Stop delivery and release resources. Idempotent.
    fn cancel(&self);
}
