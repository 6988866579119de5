//! Self-terminating ("joinable") executors.
//!
//! Listener callbacks and timers run on plain OS threads that exit after an
//! idle keep-alive window and come back on the next submission:
//! - [`worker::JoinableWorker`]: FIFO task queue
//! - [`scheduler::JoinableScheduler`]: delayed, cancellable one-shot tasks
//! - [`factory`]: pluggable [`factory::ExecutorFactory`], resolved once per process
//!
//! Nothing has to be shut down for the process to exit cleanly, and an idle
//! client holds no threads.

pub mod factory;
pub mod scheduler;
pub mod worker;

use std::any::Any;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub use factory::{
    executor_factory, install_executor_factory, shared_event_worker, DefaultExecutorFactory,
    ExecutorFactory,
};
pub use scheduler::{JoinableScheduler, ScheduledTask};
pub use worker::JoinableWorker;

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by executors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The executor was shut down and accepts no more work.
    #[error("executor '{0}' rejected the task: shut down")]
    Rejected(String),
    /// `join()` was called from one of the executor's own threads.
    #[error("join() called from a thread owned by executor '{0}'")]
    JoinFromWorker(String),
    /// The process-wide factory was already resolved.
    #[error("executor factory already resolved")]
    FactoryAlreadyResolved,
    /// The OS refused to start a thread.
    #[error("failed to spawn executor thread: {0}")]
    Spawn(String),
    /// The delay puts the deadline past what the clock can represent.
    #[error("delay of {0:?} is out of range")]
    DelayOutOfRange(Duration),
}

/// Queue that runs submitted tasks on background threads.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Enqueue a task. Never blocks.
    fn submit(&self, task: Task) -> Result<(), ExecutorError>;

    /// Block until every submitted task ran and the threads went away.
    fn join(&self) -> Result<(), ExecutorError>;

    /// Reject further submissions; queued work still drains.
    fn shutdown(&self);
}

/// Executor that can also run tasks after a delay.
pub trait Scheduler: Executor {
    /// Run `task` once after `delay`, unless cancelled first.
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledTask, ExecutorError>;
}

/// Thread naming, sizing and idle policy for an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub name: String,
    /// Upper bound on concurrent threads. FIFO order only holds for 1.
    pub threads: usize,
    /// How long an idle thread lingers before exiting.
    pub keep_alive: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { name: "pushnet-worker".to_string(), threads: 1, keep_alive: Duration::from_secs(1) }
    }
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// Lock a mutex, ignoring poisoning. Tasks never run under these locks, so a
/// poisoned guard still holds consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Name the shape of a panic payload, for debug output.
pub(crate) fn panic_payload_kind(payload: &(dyn Any + Send)) -> &'static str {
    if payload.is::<&'static str>() {
        "static str"
    } else if payload.is::<String>() {
        "formatted string"
    } else {
        "opaque value"
    }
}

/// Run a task, containing any panic so the calling thread survives.
pub(crate) fn run_contained(executor: &str, task: Task) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        tracing::error!(
            target: "pushnet::executor",
            executor = %executor,
            panic = %panic_message(payload.as_ref()),
            "task panicked"
        );
    }
}
