//! Recording subscriber: captures every signal and exposes the subscription
//! to the test through a cloneable probe.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use sse_publisher::{PublisherError, Subscriber, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    Next(T),
    Error(PublisherError),
    Complete,
}

/// What the subscriber does when an item arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    /// Return an error from `on_next` once this many items were accepted.
    RejectAfter(usize),
    /// Panic inside `on_next` once this many items were accepted.
    PanicAfter(usize),
}

struct Shared<T> {
    signals: Mutex<Vec<Signal<T>>>,
    changed: Condvar,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    initial_request: Option<i64>,
    behavior: Behavior,
    accepted: AtomicUsize,
    in_callback: AtomicUsize,
    overlapped: AtomicBool,
}

pub struct RecordingSubscriber<T> {
    shared: Arc<Shared<T>>,
}

#[derive(Clone)]
pub struct Probe<T> {
    shared: Arc<Shared<T>>,
}

pub fn recorder<T>() -> (RecordingSubscriber<T>, Probe<T>) {
    build(None, Behavior::Accept)
}

pub fn recorder_requesting<T>(n: i64) -> (RecordingSubscriber<T>, Probe<T>) {
    build(Some(n), Behavior::Accept)
}

pub fn recorder_with<T>(initial_request: Option<i64>, behavior: Behavior) -> (RecordingSubscriber<T>, Probe<T>) {
    build(initial_request, behavior)
}

fn build<T>(initial_request: Option<i64>, behavior: Behavior) -> (RecordingSubscriber<T>, Probe<T>) {
    let shared = Arc::new(Shared {
        signals: Mutex::new(Vec::new()),
        changed: Condvar::new(),
        subscription: Mutex::new(None),
        initial_request,
        behavior,
        accepted: AtomicUsize::new(0),
        in_callback: AtomicUsize::new(0),
        overlapped: AtomicBool::new(false),
    });
    (
        RecordingSubscriber {
            shared: shared.clone(),
        },
        Probe { shared },
    )
}

impl<T> Shared<T> {
    fn push(&self, signal: Signal<T>) {
        self.signals.lock().unwrap().push(signal);
        self.changed.notify_all();
    }

    fn enter(&self) {
        if self.in_callback.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.in_callback.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Send + 'static> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.shared.subscription.lock().unwrap() = Some(subscription.clone());
        if let Some(n) = self.shared.initial_request {
            subscription.request(n);
        }
    }

    fn on_next(&mut self, item: T) -> Result<(), PublisherError> {
        self.shared.enter();
        let accepted = self.shared.accepted.load(Ordering::SeqCst);
        let outcome = match self.shared.behavior {
            Behavior::RejectAfter(limit) if accepted >= limit => {
                Err(PublisherError::consumer("subscriber is full"))
            }
            Behavior::PanicAfter(limit) if accepted >= limit => {
                self.shared.exit();
                panic!("subscriber blew up");
            }
            _ => {
                self.shared.accepted.fetch_add(1, Ordering::SeqCst);
                self.shared.push(Signal::Next(item));
                Ok(())
            }
        };
        self.shared.exit();
        outcome
    }

    fn on_error(&mut self, error: PublisherError) {
        self.shared.enter();
        self.shared.push(Signal::Error(error));
        self.shared.exit();
    }

    fn on_complete(&mut self) {
        self.shared.enter();
        self.shared.push(Signal::Complete);
        self.shared.exit();
    }
}

impl<T: Clone> Probe<T> {
    pub fn signals(&self) -> Vec<Signal<T>> {
        self.shared.signals.lock().unwrap().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.signals()
            .into_iter()
            .filter_map(|s| match s {
                Signal::Next(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_signals(&self) -> Vec<Signal<T>> {
        self.signals()
            .into_iter()
            .filter(|s| !matches!(s, Signal::Next(_)))
            .collect()
    }
}

impl<T> Probe<T> {
    pub fn subscription(&self) -> Arc<dyn Subscription> {
        self.shared
            .subscription
            .lock()
            .unwrap()
            .clone()
            .expect("on_subscribe was delivered")
    }

    pub fn request(&self, n: i64) {
        self.subscription().request(n);
    }

    pub fn cancel(&self) {
        self.subscription().cancel();
    }

    pub fn delivered(&self) -> usize {
        self.shared
            .signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Signal::Next(_)))
            .count()
    }

    /// Whether two callbacks ever ran at the same time.
    pub fn overlapped(&self) -> bool {
        self.shared.overlapped.load(Ordering::SeqCst)
    }

    /// Block until a terminal signal was recorded or `timeout` elapses.
    pub fn wait_for_terminal(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |signals| {
            signals.iter().any(|s| !matches!(s, Signal::Next(_)))
        })
    }

    /// Block until at least `n` items were recorded or `timeout` elapses.
    pub fn wait_for_items(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |signals| {
            signals.iter().filter(|s| matches!(s, Signal::Next(_))).count() >= n
        })
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&[Signal<T>]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signals = self.shared.signals.lock().unwrap();
        loop {
            if done(&signals) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            signals = self
                .shared
                .changed
                .wait_timeout(signals, deadline - now)
                .unwrap()
                .0;
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
