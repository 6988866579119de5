//! Pluggable executor construction.
//!
//! Components take their executors as constructor arguments. For callers
//! that do not care, [`executor_factory`] hands out the process-wide factory:
//! whatever was passed to [`install_executor_factory`] before first use, or
//! [`DefaultExecutorFactory`] otherwise. Resolution happens once.

use super::{Executor, ExecutorConfig, ExecutorError, JoinableScheduler, JoinableWorker, Scheduler};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Builds workers and schedulers.
pub trait ExecutorFactory: Send + Sync + fmt::Debug {
    fn worker(&self, config: &ExecutorConfig) -> Arc<dyn Executor>;

    fn scheduler(&self, config: &ExecutorConfig) -> Arc<dyn Scheduler>;
}

/// Factory producing [`JoinableWorker`]s and [`JoinableScheduler`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutorFactory;

impl ExecutorFactory for DefaultExecutorFactory {
    fn worker(&self, config: &ExecutorConfig) -> Arc<dyn Executor> {
        Arc::new(JoinableWorker::new(config.clone()))
    }

    fn scheduler(&self, config: &ExecutorConfig) -> Arc<dyn Scheduler> {
        Arc::new(JoinableScheduler::new(config.clone()))
    }
}

static FACTORY: OnceLock<Arc<dyn ExecutorFactory>> = OnceLock::new();
static SHARED_EVENT_WORKER: OnceLock<Arc<dyn Executor>> = OnceLock::new();

/// Name of the worker returned by [`shared_event_worker`].
pub const SHARED_EVENT_WORKER_NAME: &str = "pushnet-events";

/// Install the process-wide factory.
///
/// Must run before anything resolves the factory (typically at startup or
/// in a test harness).
pub fn install_executor_factory(factory: Arc<dyn ExecutorFactory>) -> Result<(), ExecutorError> {
    FACTORY.set(factory).map_err(|_| ExecutorError::FactoryAlreadyResolved)
}

/// The process-wide factory, resolved on first call.
pub fn executor_factory() -> Arc<dyn ExecutorFactory> {
    Arc::clone(FACTORY.get_or_init(|| {
        tracing::debug!(target: "pushnet::executor", "using default executor factory");
        Arc::new(DefaultExecutorFactory)
    }))
}

/// Single-threaded worker shared by dispatchers that don't bring their own.
pub fn shared_event_worker() -> Arc<dyn Executor> {
    Arc::clone(SHARED_EVENT_WORKER.get_or_init(|| {
        executor_factory().worker(
            &ExecutorConfig::new(SHARED_EVENT_WORKER_NAME).with_keep_alive(Duration::from_secs(1)),
        )
    }))
}
