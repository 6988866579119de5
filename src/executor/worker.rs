//! FIFO task queue backed by self-terminating threads.

use super::{lock, run_contained, Executor, ExecutorConfig, ExecutorError, Task};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

/// Task queue whose threads exit when idle and restart on demand.
///
/// With one thread (the default) tasks run strictly in submission order and
/// never overlap. [`JoinableWorker::join`] waits for the queue to drain and
/// every thread to exit; submitting afterwards simply starts a new thread.
#[derive(Clone)]
pub struct JoinableWorker {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExecutorConfig,
    state: Mutex<State>,
    /// Signals waiting threads that work arrived (or that a joiner wants them gone).
    work_ready: Condvar,
    /// Signals joiners that the last thread exited.
    drained: Condvar,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    live: usize,
    idle: usize,
    joiners: usize,
    shutdown: bool,
    threads: Vec<ThreadId>,
    spawned: usize,
}

impl JoinableWorker {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                work_ready: Condvar::new(),
                drained: Condvar::new(),
            }),
        }
    }

    /// Name given to the backing threads.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Number of queued tasks not yet started.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// Number of threads currently alive (running or lingering).
    pub fn live_threads(&self) -> usize {
        lock(&self.inner.state).live
    }

    /// Total threads started over the worker's lifetime.
    pub fn threads_spawned(&self) -> usize {
        lock(&self.inner.state).spawned
    }

    fn spawn_thread(&self, state: &mut State) -> Result<(), ExecutorError> {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(self.inner.config.name.clone())
            .spawn(move || inner.run())
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;
        state.live += 1;
        state.spawned += 1;
        state.threads.push(handle.thread().id());
        tracing::trace!(
            target: "pushnet::executor",
            executor = %self.inner.config.name,
            live = state.live,
            "worker thread started"
        );
        Ok(())
    }
}

impl Inner {
    fn run(self: Arc<Self>) {
        let mut state = lock(&self.state);
        loop {
            if let Some(task) = state.queue.pop_front() {
                drop(state);
                run_contained(&self.config.name, task);
                state = lock(&self.state);
                continue;
            }

            if state.shutdown || state.joiners > 0 {
                break;
            }

            state.idle += 1;
            let (guard, wait) = self
                .work_ready
                .wait_timeout(state, self.config.keep_alive)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
            state.idle -= 1;

            if wait.timed_out() && state.queue.is_empty() {
                break;
            }
        }

        let me = thread::current().id();
        state.threads.retain(|id| *id != me);
        state.live -= 1;
        tracing::trace!(
            target: "pushnet::executor",
            executor = %self.config.name,
            live = state.live,
            "worker thread exiting"
        );
        if state.live == 0 {
            self.drained.notify_all();
        }
    }
}

impl Executor for JoinableWorker {
    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        let mut state = lock(&self.inner.state);
        if state.shutdown {
            return Err(ExecutorError::Rejected(self.inner.config.name.clone()));
        }
        state.queue.push_back(task);

        if state.idle > 0 {
            self.inner.work_ready.notify_one();
        } else if state.live < self.inner.config.threads {
            if let Err(e) = self.spawn_thread(&mut state) {
                if state.live == 0 {
                    // Nobody left to run it.
                    state.queue.pop_back();
                    return Err(e);
                }
                tracing::warn!(
                    target: "pushnet::executor",
                    executor = %self.inner.config.name,
                    error = %e,
                    "could not grow worker, task stays queued"
                );
            }
        }
        Ok(())
    }

    fn join(&self) -> Result<(), ExecutorError> {
        let mut state = lock(&self.inner.state);
        if state.threads.contains(&thread::current().id()) {
            return Err(ExecutorError::JoinFromWorker(self.inner.config.name.clone()));
        }

        state.joiners += 1;
        // Lingering threads should exit now rather than after keep-alive.
        self.inner.work_ready.notify_all();
        while state.live > 0 || !state.queue.is_empty() {
            state = self
                .inner
                .drained
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        state.joiners -= 1;
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        state.shutdown = true;
        self.inner.work_ready.notify_all();
    }
}

impl fmt::Debug for JoinableWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("JoinableWorker")
            .field("name", &self.inner.config.name)
            .field("threads", &self.inner.config.threads)
            .field("live", &state.live)
            .field("pending", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn worker(keep_alive_ms: u64) -> JoinableWorker {
        JoinableWorker::new(
            ExecutorConfig::new("test-worker").with_keep_alive(Duration::from_millis(keep_alive_ms)),
        )
    }

    #[test]
    fn test_fifo_order() {
        let w = worker(50);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            w.submit(Box::new(move || seen.lock().unwrap().push(i))).unwrap();
        }
        w.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_join_then_resubmit() {
        let w = worker(5_000);
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        w.submit(Box::new(move || {
            thread::sleep(Duration::from_millis(20));
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        w.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(w.live_threads(), 0);

        let c = Arc::clone(&count);
        w.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        w.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(w.threads_spawned(), 2);
    }

    #[test]
    fn test_idle_thread_exits_after_keep_alive() {
        let w = worker(30);
        w.submit(Box::new(|| {})).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(w.live_threads(), 0);

        // Comes back on demand.
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        w.submit(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        w.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let w = worker(50);
        let ran = Arc::new(AtomicUsize::new(0));
        w.submit(Box::new(|| panic!("task failure"))).unwrap();
        let r = Arc::clone(&ran);
        w.submit(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        w.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(w.threads_spawned(), 1);
    }

    #[test]
    fn test_shutdown_rejects() {
        let w = worker(50);
        w.shutdown();
        let err = w.submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err, ExecutorError::Rejected("test-worker".to_string()));
        w.join().unwrap();
    }

    #[test]
    fn test_join_from_worker_thread_is_refused() {
        let w = worker(50);
        let result = Arc::new(Mutex::new(None));
        let (w2, r) = (w.clone(), Arc::clone(&result));
        w.submit(Box::new(move || {
            *r.lock().unwrap() = Some(w2.join());
        }))
        .unwrap();
        w.join().unwrap();
        assert!(matches!(
            result.lock().unwrap().clone(),
            Some(Err(ExecutorError::JoinFromWorker(_)))
        ));
    }

    #[test]
    fn test_multi_thread_worker_runs_everything() {
        let w = JoinableWorker::new(
            ExecutorConfig::new("pool").with_threads(4).with_keep_alive(Duration::from_millis(50)),
        );
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let c = Arc::clone(&count);
            w.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        w.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 64);
        assert!(w.threads_spawned() <= 64);
    }
}
