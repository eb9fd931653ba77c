//! `futures::Stream` view of a publisher.
//!
//! [`SubscriberStream`] subscribes on creation, keeps at most `prefetch` items
//! in flight and tops the demand back up once half of that window has been
//! consumed. Dropping the stream cancels the subscription.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{PublisherError, Result};
use crate::flow::{Publisher, Subscriber, Subscription};

enum Signal<T> {
    Next(T),
    Error(PublisherError),
    Complete,
}

type SubscriptionSlot = Arc<OnceLock<Arc<dyn Subscription>>>;

struct ForwardingSubscriber<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    slot: SubscriptionSlot,
    prefetch: i64,
}

impl<T: Send + 'static> Subscriber<T> for ForwardingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let _ = self.slot.set(subscription.clone());
        subscription.request(self.prefetch);
    }

    fn on_next(&mut self, item: T) -> std::result::Result<(), PublisherError> {
        self.tx
            .send(Signal::Next(item))
            .map_err(|_| PublisherError::consumer("stream receiver dropped"))
    }

    fn on_error(&mut self, error: PublisherError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.tx.send(Signal::Complete);
    }
}

struct CancelOnDrop(SubscriptionSlot);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.get() {
            subscription.cancel();
        }
    }
}

/// Pull-driven stream over any [`Publisher`].
pub struct SubscriberStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
}

impl<T: Send + 'static> SubscriberStream<T> {
    /// Subscribe to `publisher` with a demand window of `prefetch` items
    /// (at least one).
    pub fn new<P>(publisher: &P, prefetch: usize) -> Self
    where
        P: Publisher<T>,
    {
        let prefetch = prefetch.max(1);
        let replenish_at = (prefetch / 2).max(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slot: SubscriptionSlot = Arc::new(OnceLock::new());

        publisher.subscribe(ForwardingSubscriber {
            tx,
            slot: slot.clone(),
            prefetch: i64::try_from(prefetch).unwrap_or(i64::MAX),
        });

        let guard = CancelOnDrop(slot.clone());
        let stream = async_stream::stream! {
            let _guard = guard;
            let mut consumed = 0usize;
            while let Some(signal) = rx.recv().await {
                match signal {
                    Signal::Next(item) => {
                        consumed += 1;
                        if consumed >= replenish_at {
                            if let Some(subscription) = slot.get() {
                                subscription.request(consumed as i64);
                            }
                            consumed = 0;
                        }
                        yield Ok(item);
                    }
                    Signal::Error(err) => {
                        yield Err(err);
                        break;
                    }
                    Signal::Complete => break,
                }
            }
        };

        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<T> Stream for SubscriberStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
