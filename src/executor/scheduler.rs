//! Delayed one-shot tasks on a self-terminating timer thread.

use super::{lock, run_contained, Executor, ExecutorConfig, ExecutorError, Scheduler, Task};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Handle to a task submitted with [`Scheduler::schedule`].
///
/// Cancellation is cooperative: it only wins if the task has not started.
#[derive(Clone)]
pub struct ScheduledTask {
    status: Arc<AtomicU8>,
    scheduler: Weak<Inner>,
}

impl ScheduledTask {
    /// Prevent the task from running.
    ///
    /// Returns `true` if the task was still pending. Once it started (or
    /// finished) this is a no-op returning `false`.
    pub fn cancel(&self) -> bool {
        let won = self
            .status
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            // Let the timer thread drop the entry instead of sleeping on it.
            if let Some(inner) = self.scheduler.upgrade() {
                let _guard = lock(&inner.state);
                inner.wakeup.notify_all();
            }
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.load(Ordering::Acquire) == CANCELLED
    }

    /// True once the task body returned (or panicked).
    pub fn is_done(&self) -> bool {
        self.status.load(Ordering::Acquire) == DONE
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status.load(Ordering::Acquire) {
            PENDING => "pending",
            RUNNING => "running",
            DONE => "done",
            _ => "cancelled",
        };
        f.debug_struct("ScheduledTask").field("status", &status).finish()
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    status: Arc<AtomicU8>,
    task: Task,
}

impl Entry {
    fn is_pending(&self) -> bool {
        self.status.load(Ordering::Acquire) == PENDING
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Earlier deadline first, submission order within a deadline
        self.deadline.cmp(&other.deadline).then(self.seq.cmp(&other.seq))
    }
}

/// Timer queue with the same idle discipline as [`super::JoinableWorker`].
///
/// A single thread fires due tasks in deadline order; it exits after the
/// keep-alive window once no timers remain.
#[derive(Clone)]
pub struct JoinableScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExecutorConfig,
    state: Mutex<State>,
    wakeup: Condvar,
    drained: Condvar,
}

#[derive(Default)]
struct State {
    timers: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    running: bool,
    thread: Option<ThreadId>,
    joiners: usize,
    shutdown: bool,
}

impl JoinableScheduler {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                wakeup: Condvar::new(),
                drained: Condvar::new(),
            }),
        }
    }

    /// Timers not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).timers.iter().filter(|Reverse(e)| e.is_pending()).count()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }

    fn enqueue(&self, task: Task, delay: Duration) -> Result<ScheduledTask, ExecutorError> {
        let deadline =
            Instant::now().checked_add(delay).ok_or(ExecutorError::DelayOutOfRange(delay))?;
        let mut state = lock(&self.inner.state);
        if state.shutdown {
            return Err(ExecutorError::Rejected(self.inner.config.name.clone()));
        }

        let status = Arc::new(AtomicU8::new(PENDING));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(Entry {
            deadline,
            seq,
            status: Arc::clone(&status),
            task,
        }));

        if state.running {
            self.inner.wakeup.notify_all();
        } else {
            let inner = Arc::clone(&self.inner);
            let spawned = thread::Builder::new()
                .name(self.inner.config.name.clone())
                .spawn(move || inner.run());
            match spawned {
                Ok(handle) => {
                    state.running = true;
                    state.thread = Some(handle.thread().id());
                }
                Err(e) => {
                    state.timers.retain(|Reverse(entry)| entry.seq != seq);
                    return Err(ExecutorError::Spawn(e.to_string()));
                }
            }
        }

        Ok(ScheduledTask { status, scheduler: Arc::downgrade(&self.inner) })
    }
}

impl Inner {
    fn run(self: Arc<Self>) {
        let mut state = lock(&self.state);
        loop {
            state.timers.retain(|Reverse(entry)| entry.is_pending());

            let now = Instant::now();
            let next_deadline = state.timers.peek().map(|Reverse(entry)| entry.deadline);
            match next_deadline {
                Some(deadline) if deadline <= now => {
                    let Some(Reverse(entry)) = state.timers.pop() else {
                        continue;
                    };
                    drop(state);
                    if entry
                        .status
                        .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        run_contained(&self.config.name, entry.task);
                        entry.status.store(DONE, Ordering::Release);
                    }
                    state = lock(&self.state);
                }
                Some(deadline) => {
                    let (guard, _) = self
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                }
                None => {
                    if state.shutdown || state.joiners > 0 {
                        break;
                    }
                    let (guard, wait) = self
                        .wakeup
                        .wait_timeout(state, self.config.keep_alive)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                    if wait.timed_out() && state.timers.is_empty() {
                        break;
                    }
                }
            }
        }

        state.running = false;
        state.thread = None;
        tracing::trace!(
            target: "pushnet::executor",
            executor = %self.config.name,
            "scheduler thread exiting"
        );
        self.drained.notify_all();
    }
}

impl Executor for JoinableScheduler {
    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        self.enqueue(task, Duration::ZERO).map(|_| ())
    }

    /// Waits for every pending timer to fire (or be cancelled) and the
    /// timer thread to exit.
    fn join(&self) -> Result<(), ExecutorError> {
        let mut state = lock(&self.inner.state);
        if state.thread == Some(thread::current().id()) {
            return Err(ExecutorError::JoinFromWorker(self.inner.config.name.clone()));
        }
        state.joiners += 1;
        self.inner.wakeup.notify_all();
        while state.running {
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
        self.inner.wakeup.notify_all();
    }
}

impl Scheduler for JoinableScheduler {
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledTask, ExecutorError> {
        self.enqueue(task, delay)
    }
}

impl fmt::Debug for JoinableScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("JoinableScheduler")
            .field("name", &self.inner.config.name)
            .field("running", &state.running)
            .field("timers", &state.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> JoinableScheduler {
        JoinableScheduler::new(
            ExecutorConfig::new("test-timer").with_keep_alive(Duration::from_millis(50)),
        )
    }

    fn counter_task(count: &Arc<AtomicUsize>) -> Task {
        let c = Arc::clone(count);
        Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_cancel_before_fire() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = s.schedule(counter_task(&count), Duration::from_millis(500)).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(handle.cancel());
        s.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_cancel_after_fire_has_no_effect() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = s.schedule(counter_task(&count), Duration::from_millis(500)).unwrap();

        thread::sleep(Duration::from_millis(600));
        assert!(!handle.cancel());
        s.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_done());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let s = scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for (label, delay) in [("c", 60), ("a", 20), ("b", 40)] {
            let seen = Arc::clone(&seen);
            s.schedule(Box::new(move || seen.lock().unwrap().push(label)), Duration::from_millis(delay))
                .unwrap();
        }
        s.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_submit_runs_immediately_and_restarts() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        s.submit(counter_task(&count)).unwrap();
        s.join().unwrap();
        assert!(!s.is_running());

        s.submit(counter_task(&count)).unwrap();
        s.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_join_waits_for_delayed_task() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        s.schedule(counter_task(&count), Duration::from_millis(80)).unwrap();
        s.join().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_huge_delay_rejected() {
        let s = scheduler();
        let err = s.schedule(Box::new(|| {}), Duration::MAX).unwrap_err();
        assert_eq!(err, ExecutorError::DelayOutOfRange(Duration::MAX));
        assert_eq!(s.pending(), 0);

        // Still usable afterwards.
        let count = Arc::new(AtomicUsize::new(0));
        s.schedule(counter_task(&count), Duration::from_millis(10)).unwrap();
        s.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_rejects_new_timers() {
        let s = scheduler();
        s.shutdown();
        assert!(s.schedule(Box::new(|| {}), Duration::from_millis(10)).is_err());
    }
}
