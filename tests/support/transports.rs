//! Test transports and dispatchers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use sse_publisher::dispatch::{RejectedTask, Task, TaskDispatcher};
use sse_publisher::source::{EventTransport, InboundEvent};
use sse_publisher::{PublisherError, Result};

/// Transport fed one event at a time by the test; blocks in `next_event`
/// until the test sends something or drops the feeder.
pub struct FeedTransport {
    rx: mpsc::Receiver<Result<InboundEvent>>,
    pub closes: Arc<AtomicUsize>,
    pub reader_thread: Arc<Mutex<Option<String>>>,
}

pub struct Feeder {
    tx: Option<mpsc::Sender<Result<InboundEvent>>>,
}

impl Feeder {
    pub fn send(&self, data: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(InboundEvent::message(data)));
        }
    }

    pub fn fail(&self, error: PublisherError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(error));
        }
    }

    /// End of stream.
    pub fn finish(&mut self) {
        self.tx.take();
    }
}

pub fn feed_transport() -> (FeedTransport, Feeder) {
    let (tx, rx) = mpsc::channel();
    (
        FeedTransport {
            rx,
            closes: Arc::new(AtomicUsize::new(0)),
            reader_thread: Arc::new(Mutex::new(None)),
        },
        Feeder { tx: Some(tx) },
    )
}

impl EventTransport for FeedTransport {
    fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        {
            let mut name = self.reader_thread.lock().unwrap();
            if name.is_none() {
                *name = std::thread::current().name().map(str::to_string);
            }
        }
        match self.rx.recv() {
            Ok(item) => item.map(Some),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Dispatcher that refuses every task.
#[derive(Debug, Default)]
pub struct RejectingDispatcher {
    pub rejected: AtomicUsize,
}

impl TaskDispatcher for RejectingDispatcher {
    fn submit(&self, task: Task) -> std::result::Result<(), RejectedTask> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        Err(RejectedTask::new(task, "pool exhausted"))
    }

    fn name(&self) -> &str {
        "rejecting"
    }
}
