//! Background task dispatch
//!
//! The read loop of a publisher blocks on network I/O, so it is handed to a
//! [`TaskDispatcher`] rather than run on the caller's thread. A dispatcher may
//! refuse work (bounded pool, shutdown); [`dispatch_with_fallback`] then runs
//! the task on a dedicated named thread instead of losing the stream.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::error::{PublisherError, Result};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task handed back by a dispatcher that refused it.
pub struct RejectedTask {
    task: Task,
    reason: String,
}

impl RejectedTask {
    pub fn new(task: Task, reason: impl Into<String>) -> Self {
        Self {
            task,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Recover the task so it can be run elsewhere.
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl std::fmt::Debug for RejectedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectedTask")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Accepts background work for execution.
pub trait TaskDispatcher: Send + Sync {
    /// Schedule `task`, or hand it back if it cannot be accepted.
    fn submit(&self, task: Task) -> std::result::Result<(), RejectedTask>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "dispatcher"
    }
}

/// Spawn `task` on a new OS thread. On failure the task is handed back
/// together with the spawn error.
fn spawn_named(name: &str, task: Task) -> std::result::Result<(), (Task, std::io::Error)> {
    let slot = Arc::new(Mutex::new(Some(task)));
    let slot_for_thread = slot.clone();
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let task = slot_for_thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                task();
            }
        });

    match spawned {
        Ok(_) => Ok(()),
        Err(err) => {
            let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            match task {
                Some(task) => Err((task, err)),
                // The thread never ran, so the slot cannot be empty; treat it
                // as handed off.
                None => Ok(()),
            }
        }
    }
}

/// Runs every task on its own freshly spawned, named OS thread.
///
/// Used when a publisher is built without an explicit dispatcher.
#[derive(Debug, Clone)]
pub struct ThreadDispatcher {
    thread_name: String,
}

impl ThreadDispatcher {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_READER_THREAD_NAME)
    }
}

impl TaskDispatcher for ThreadDispatcher {
    fn submit(&self, task: Task) -> std::result::Result<(), RejectedTask> {
        spawn_named(&self.thread_name, task)
            .map_err(|(task, err)| RejectedTask::new(task, format!("thread spawn failed: {err}")))
    }

    fn name(&self) -> &str {
        &self.thread_name
    }
}

/// Runs tasks on a tokio runtime's blocking pool, at most `max_tasks` at once.
///
/// Submissions beyond the limit, or after [`shutdown`](Self::shutdown), are
/// rejected rather than queued.
#[derive(Debug, Clone)]
pub struct BlockingDispatcher {
    handle: Handle,
    permits: Arc<Semaphore>,
    name: String,
}

impl BlockingDispatcher {
    /// `max_tasks` is capped at [`Semaphore::MAX_PERMITS`].
    pub fn new(handle: Handle, max_tasks: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_tasks.min(Semaphore::MAX_PERMITS))),
            name: "tokio-blocking".to_string(),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn current(max_tasks: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            PublisherError::Config(format!("no tokio runtime available: {e}"))
        })?;
        Ok(Self::new(handle, max_tasks))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of tasks that can still be accepted right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse all further submissions. Running tasks are unaffected.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

impl TaskDispatcher for BlockingDispatcher {
    fn submit(&self, task: Task) -> std::result::Result<(), RejectedTask> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                // tokio panics when it cannot start a blocking thread; keep the
                // task reachable so it can be handed back.
                let slot = Arc::new(Mutex::new(Some(task)));
                let slot_for_pool = slot.clone();
                let spawned = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.handle.spawn_blocking(move || {
                        let _permit = permit;
                        let task = slot_for_pool
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        if let Some(task) = task {
                            task();
                        }
                    })
                }));
                if spawned.is_ok() {
                    return Ok(());
                }
                let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                match task {
                    Some(task) => Err(RejectedTask::new(task, "blocking thread spawn failed")),
                    None => Ok(()),
                }
            }
            Err(tokio::sync::TryAcquireError::Closed) => {
                Err(RejectedTask::new(task, "dispatcher is shut down"))
            }
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                Err(RejectedTask::new(task, "no free blocking slots"))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Submit `task`; if the dispatcher refuses it, run it on a new thread named
/// `fallback_thread_name`. Fails only if that thread cannot be spawned either.
pub fn dispatch_with_fallback(
    dispatcher: &dyn TaskDispatcher,
    task: Task,
    fallback_thread_name: &str,
) -> Result<()> {
    let rejected = match dispatcher.submit(task) {
        Ok(()) => return Ok(()),
        Err(rejected) => rejected,
    };

    tracing::warn!(
        dispatcher = dispatcher.name(),
        reason = rejected.reason(),
        thread = fallback_thread_name,
        "Dispatcher rejected read task; running it on a fallback thread"
    );

    spawn_named(fallback_thread_name, rejected.into_task()).map_err(|(_, err)| {
        tracing::error!(thread = fallback_thread_name, error = %err, "fallback thread spawn failed");
        PublisherError::TaskRejected(format!(
            "dispatcher '{}' rejected the task and fallback thread failed: {err}",
            dispatcher.name()
        ))
    })
}
