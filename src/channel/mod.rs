//! Backpressure Channel
//!
//! The engine between a producer that pushes decoded events and a subscriber
//! that pulls them by declaring demand. Producer calls ([`BackpressureChannel::buffer`],
//! [`complete`](BackpressureChannel::complete), [`fail`](BackpressureChannel::fail))
//! and subscriber calls ([`Subscription::request`], [`Subscription::cancel`])
//! may arrive on any thread; all of them funnel into one drain routine guarded
//! by a work-in-progress counter, so the subscriber is only ever invoked by a
//! single thread at a time.
//!
//! ```rust,ignore
//! use sse_publisher::channel::BackpressureChannel;
//!
//! let channel = BackpressureChannel::subscribe(my_subscriber, 512)?;
//! channel.buffer(event);
//! channel.complete();
//! ```

mod cleanup;
mod ring;

pub use cleanup::{CleanupAction, CleanupSlot};
pub use ring::DropOldestBuffer;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::error::{PublisherError, Result};
use crate::flow::demand;
use crate::flow::{Subscriber, Subscription};

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const FAILED: u8 = 2;

/// Point-in-time counters for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    /// Items waiting for demand.
    pub buffered: usize,
    /// Items evicted by drop-oldest overflow.
    pub dropped: u64,
    /// Items handed to `on_next`.
    pub delivered: u64,
    /// Outstanding demand ([`demand::UNBOUNDED`] when unbounded).
    pub requested: u64,
}

/// Single-subscriber queue with demand accounting and drop-oldest overflow.
pub struct BackpressureChannel<T> {
    id: Uuid,
    subscriber: Mutex<Option<Box<dyn Subscriber<T>>>>,
    buffer: DropOldestBuffer<T>,
    requested: AtomicU64,
    wip: AtomicUsize,
    terminal: AtomicU8,
    failure: Mutex<Option<PublisherError>>,
    violation: Mutex<Option<PublisherError>>,
    cancelled: AtomicBool,
    finished: AtomicBool,
    cleanup: CleanupSlot,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl<T> std::fmt::Debug for BackpressureChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureChannel")
            .field("id", &self.id)
            .field("buffered", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("requested", &self.requested.load(Ordering::Relaxed))
            .field("terminal", &self.terminal.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<T: Send + 'static> BackpressureChannel<T> {
    /// Create a channel for `subscriber` and deliver `on_subscribe`.
    ///
    /// A zero `capacity` is rejected with [`PublisherError::Config`]; the
    /// subscriber is dropped without being signalled.
    pub fn subscribe<S>(subscriber: S, capacity: usize) -> Result<Arc<Self>>
    where
        S: Subscriber<T>,
    {
        if capacity == 0 {
            return Err(PublisherError::Config(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }

        let channel = Arc::new(Self {
            id: Uuid::new_v4(),
            subscriber: Mutex::new(Some(Box::new(subscriber))),
            buffer: DropOldestBuffer::new(capacity),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            terminal: AtomicU8::new(ACTIVE),
            failure: Mutex::new(None),
            violation: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cleanup: CleanupSlot::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });
        channel.start();
        Ok(channel)
    }

    /// Deliver `on_subscribe` while owning the drain right, then run any work
    /// the subscriber queued from inside that callback.
    fn start(self: &Arc<Self>) {
        self.wip.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(subscription_id = %self.id, capacity = self.buffer.capacity(), "subscribed");

        let handle: Arc<dyn Subscription> = Arc::clone(self) as Arc<dyn Subscription>;
        let outcome = {
            let mut guard = lock(&self.subscriber);
            match guard.as_mut() {
                Some(subscriber) => {
                    panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_subscribe(handle)))
                }
                None => Ok(()),
            }
        };
        if let Err(payload) = outcome {
            tracing::warn!(
                subscription_id = %self.id,
                panic = %panic_message(payload.as_ref()),
                "on_subscribe panicked; cancelling subscription"
            );
            self.cancel();
        }

        self.drain_loop();
    }

    /// Unique id of this subscription, used as a log field.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Install the release action run exactly once by whichever of cancel,
    /// completion or failure ends the subscription first.
    pub fn on_termination<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup.set(Box::new(action));
    }

    /// Producer side: enqueue an item, evicting the oldest one when full.
    ///
    /// Silently ignored once the channel is terminated or cancelled.
    pub fn buffer(&self, item: T) {
        if self.is_terminated() || self.is_cancelled() {
            return;
        }

        if self.buffer.push(item).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(
                subscription_id = %self.id,
                capacity = self.buffer.capacity(),
                dropped,
                "Dropping server-sent event due to lack of subscriber requests"
            );
        }

        self.drain();
    }

    /// Producer side: no more items will follow. Buffered items are flushed
    /// before `on_complete` is signalled.
    pub fn complete(&self) {
        if self
            .terminal
            .compare_exchange(ACTIVE, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(subscription_id = %self.id, "completion recorded");
        }
        self.drain();
    }

    /// Producer side: the source failed. Buffered items are flushed before
    /// `on_error(cause)` is signalled. Ignored once terminated or cancelled.
    pub fn fail(&self, cause: PublisherError) {
        if self.is_terminated() || self.is_cancelled() {
            return;
        }

        {
            let mut failure = lock(&self.failure);
            if self
                .terminal
                .compare_exchange(ACTIVE, FAILED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            tracing::debug!(subscription_id = %self.id, error = %cause, "failure recorded");
            *failure = Some(cause);
        }

        self.drain();
    }

    /// Like [`fail`](Self::fail) for boundary code that may not have a cause;
    /// `None` is replaced by [`PublisherError::MissingCause`].
    pub fn fail_opt(&self, cause: Option<PublisherError>) {
        self.fail(cause.unwrap_or(PublisherError::MissingCause));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether `complete` or `fail` has been recorded.
    pub fn is_terminated(&self) -> bool {
        self.terminal.load(Ordering::Acquire) != ACTIVE
    }

    /// Whether a terminal signal has been handed to the subscriber.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            buffered: self.buffer.len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            requested: self.requested.load(Ordering::Acquire),
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        self.drain_loop();
    }

    /// Body of the drain; the caller must own the drain right.
    fn drain_loop(&self) {
        let mut missed = 1usize;

        loop {
            let requested = self.requested.load(Ordering::Acquire);
            let mut emitted = 0u64;

            while emitted != requested {
                if self.discard_if_cancelled() {
                    return;
                }

                // Read termination before polling so an empty poll after a
                // recorded termination really means nothing is left.
                let done = self.is_terminated();
                let Some(item) = self.buffer.pop() else {
                    if done {
                        self.signal_terminal();
                        return;
                    }
                    break;
                };

                self.deliver_next(item);
                emitted += 1;
            }

            if emitted == requested {
                if self.discard_if_cancelled() {
                    return;
                }
                if self.is_terminated() && self.buffer.is_empty() {
                    self.signal_terminal();
                    return;
                }
            }

            if emitted != 0 {
                demand::produced(&self.requested, emitted);
            }

            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }

    fn deliver_next(&self, item: T) {
        let outcome = {
            let mut guard = lock(&self.subscriber);
            let Some(subscriber) = guard.as_mut() else {
                return;
            };
            panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_next(item)))
        };

        match outcome {
            Ok(Ok(())) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    subscription_id = %self.id,
                    error = %err,
                    "subscriber rejected item; cancelling subscription"
                );
                self.cancel();
            }
            Err(payload) => {
                tracing::warn!(
                    subscription_id = %self.id,
                    panic = %panic_message(payload.as_ref()),
                    "on_next panicked; cancelling subscription"
                );
                self.cancel();
            }
        }
    }

    /// If cancelled, drop everything still buffered, report a pending
    /// protocol violation, and let go of the subscriber.
    fn discard_if_cancelled(&self) -> bool {
        if !self.is_cancelled() {
            return false;
        }

        let discarded = self.buffer.clear();
        if discarded > 0 {
            tracing::debug!(subscription_id = %self.id, discarded, "discarded buffered events after cancel");
        }

        let violation = lock(&self.violation).take();
        if let Some(err) = violation {
            self.finished.store(true, Ordering::Release);
            self.deliver_terminal(|subscriber| subscriber.on_error(err));
        }

        self.release_subscriber();
        true
    }

    fn signal_terminal(&self) {
        if self.discard_if_cancelled() {
            return;
        }

        self.finished.store(true, Ordering::Release);
        if self.terminal.load(Ordering::Acquire) == FAILED {
            let err = lock(&self.failure)
                .take()
                .unwrap_or(PublisherError::MissingCause);
            tracing::debug!(subscription_id = %self.id, error = %err, "signalling error");
            self.deliver_terminal(|subscriber| subscriber.on_error(err));
        } else {
            tracing::debug!(subscription_id = %self.id, "signalling completion");
            self.deliver_terminal(|subscriber| subscriber.on_complete());
        }

        self.cleanup.run();
        self.release_subscriber();
    }

    fn deliver_terminal<F>(&self, signal: F)
    where
        F: FnOnce(&mut dyn Subscriber<T>),
    {
        let outcome = {
            let mut guard = lock(&self.subscriber);
            let Some(subscriber) = guard.as_mut() else {
                return;
            };
            panic::catch_unwind(AssertUnwindSafe(|| signal(subscriber.as_mut())))
        };
        if let Err(payload) = outcome {
            tracing::warn!(
                subscription_id = %self.id,
                panic = %panic_message(payload.as_ref()),
                "terminal signal panicked"
            );
        }
    }

    fn release_subscriber(&self) {
        // The subscriber usually holds the subscription handle; dropping it
        // here breaks that cycle. Dropped outside the lock.
        let subscriber = lock(&self.subscriber).take();
        drop(subscriber);
    }
}

impl<T: Send + 'static> Subscription for BackpressureChannel<T> {
    fn request(&self, n: i64) {
        if self.is_finished() || self.is_cancelled() {
            return;
        }

        if n <= 0 {
            {
                let mut violation = lock(&self.violation);
                if violation.is_none() {
                    *violation = Some(PublisherError::InvalidRequest(n));
                }
            }
            tracing::debug!(subscription_id = %self.id, n, "non-positive request; cancelling");
            self.cancel();
            return;
        }

        demand::add(&self.requested, n as u64);
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(subscription_id = %self.id, "subscription cancelled");
            self.cleanup.run();
        }
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Signal {
        Next(&'static str),
        Error(PublisherError),
        Complete,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        signals: Arc<Mutex<Vec<Signal>>>,
        subscription: Arc<Mutex<Option<Arc<dyn Subscription>>>>,
    }

    impl Recorder {
        fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }

        fn request(&self, n: i64) {
            let sub = self.subscription.lock().unwrap().clone().unwrap();
            sub.request(n);
        }
    }

    impl Subscriber<&'static str> for Recorder {
        fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
            *self.subscription.lock().unwrap() = Some(subscription);
        }

        fn on_next(&mut self, item: &'static str) -> std::result::Result<(), PublisherError> {
            self.signals.lock().unwrap().push(Signal::Next(item));
            Ok(())
        }

        fn on_error(&mut self, error: PublisherError) {
            self.signals.lock().unwrap().push(Signal::Error(error));
        }

        fn on_complete(&mut self) {
            self.signals.lock().unwrap().push(Signal::Complete);
        }
    }

    #[test]
    fn overflow_keeps_most_recent_items() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 2).unwrap();
        channel.buffer("a");
        channel.buffer("b");
        channel.buffer("c");
        recorder.request(2);

        assert_eq!(recorder.signals(), vec![Signal::Next("b"), Signal::Next("c")]);
        assert_eq!(channel.stats().dropped, 1);
    }

    #[test]
    fn demand_before_item_delivers_once() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        recorder.request(1);
        channel.buffer("x");
        channel.buffer("y");

        assert_eq!(recorder.signals(), vec![Signal::Next("x")]);
        assert_eq!(channel.stats().buffered, 1);
    }

    #[test]
    fn completion_waits_for_demand_to_flush() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        channel.buffer("x");
        channel.complete();
        assert!(recorder.signals().is_empty());

        recorder.request(5);
        assert_eq!(recorder.signals(), vec![Signal::Next("x"), Signal::Complete]);
        assert!(channel.is_finished());
    }

    #[test]
    fn failure_is_not_lossy() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        channel.buffer("x");
        channel.fail(PublisherError::transport("eof"));
        channel.complete();
        recorder.request(1);

        assert_eq!(
            recorder.signals(),
            vec![
                Signal::Next("x"),
                Signal::Error(PublisherError::Transport("eof".into()))
            ]
        );
    }

    #[test]
    fn missing_cause_is_substituted() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        channel.fail_opt(None);

        assert_eq!(
            recorder.signals(),
            vec![Signal::Error(PublisherError::MissingCause)]
        );
    }

    #[test]
    fn non_positive_request_reports_violation() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        channel.buffer("x");
        recorder.request(0);
        recorder.request(-1);
        channel.buffer("y");

        assert_eq!(
            recorder.signals(),
            vec![Signal::Error(PublisherError::InvalidRequest(0))]
        );
        assert!(channel.is_cancelled());
        assert_eq!(channel.stats().buffered, 0);
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        let recorder = Recorder::default();
        let err = BackpressureChannel::subscribe(recorder.clone(), 0).unwrap_err();

        assert!(matches!(err, PublisherError::Config(_)));
        assert!(recorder.subscription.lock().unwrap().is_none());
    }

    #[test]
    fn unbounded_demand_is_not_consumed() {
        let recorder = Recorder::default();
        let channel = BackpressureChannel::subscribe(recorder.clone(), 4).unwrap();
        recorder.request(i64::MAX);
        recorder.request(i64::MAX);
        assert_eq!(channel.stats().requested, demand::UNBOUNDED);

        channel.buffer("a");
        channel.buffer("b");
        assert_eq!(channel.stats().requested, demand::UNBOUNDED);
        assert_eq!(channel.stats().delivered, 2);
    }
}
