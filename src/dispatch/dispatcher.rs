use crate::dispatch::event::Event;
use crate::executor::{
    lock, panic_message, panic_payload_kind, shared_event_worker, Executor, ExecutorError,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A listener's membership in one dispatcher.
///
/// Delivery tasks hold the registration itself (not a copy of its state), so
/// a removal is visible to every task still waiting in the queue.
pub struct ListenerRegistration<L: ?Sized> {
    listener: Arc<L>,
    alive: AtomicBool,
}

impl<L: ?Sized> ListenerRegistration<L> {
    fn new(listener: Arc<L>) -> Self {
        Self { listener, alive: AtomicBool::new(true) }
    }

    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }

    /// False once the listener was removed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn is(&self, listener: &Arc<L>) -> bool {
        identity(&self.listener) == identity(listener)
    }
}

/// Listener identity: the allocation the `Arc` points to, without vtable.
fn identity<L: ?Sized>(listener: &Arc<L>) -> *const () {
    Arc::as_ptr(listener).cast::<()>()
}

/// Serializes delivery of events to every listener of kind `L`.
///
/// All deliveries go through one worker (ideally single-threaded), so each
/// listener observes a consistent timeline: its start event, every broadcast
/// made while it was registered, then its end event.
pub struct EventDispatcher<L: ?Sized + Send + Sync + 'static> {
    name: Arc<str>,
    worker: Arc<dyn Executor>,
    // Guards registration, removal and the enumeration done by `dispatch`.
    registrations: Mutex<Vec<Arc<ListenerRegistration<L>>>>,
}

impl<L: ?Sized + Send + Sync + 'static> EventDispatcher<L> {
    /// Create a dispatcher delivering on `worker`.
    pub fn new(name: impl Into<String>, worker: Arc<dyn Executor>) -> Self {
        let name: String = name.into();
        Self { name: Arc::from(name), worker, registrations: Mutex::new(Vec::new()) }
    }

    /// Create a dispatcher on the process-wide event worker.
    pub fn with_shared_worker(name: impl Into<String>) -> Self {
        Self::new(name, shared_event_worker())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `listener` and deliver `start_event` to it.
    ///
    /// Returns `false` (and delivers nothing) if it was already registered.
    pub fn add_listener<E: Event<L>>(&self, listener: Arc<L>, start_event: E) -> bool {
        let mut registrations = lock(&self.registrations);
        if registrations.iter().any(|r| r.is(&listener)) {
            return false;
        }

        let registration = Arc::new(ListenerRegistration::new(listener));
        registrations.push(Arc::clone(&registration));
        // Enqueue under the lock so no broadcast can slip in ahead of the start event.
        self.enqueue(registration, Arc::new(start_event), std::any::type_name::<E>(), true);
        true
    }

    /// Unregister `listener` and deliver `end_event` to it.
    ///
    /// Broadcasts still queued for it are dropped. Returns `false` if it was
    /// not registered.
    pub fn remove_listener<E: Event<L>>(&self, listener: &Arc<L>, end_event: E) -> bool {
        let mut registrations = lock(&self.registrations);
        let Some(pos) = registrations.iter().position(|r| r.is(listener)) else {
            return false;
        };

        let registration = registrations.remove(pos);
        registration.alive.store(false, Ordering::Release);
        self.enqueue(registration, Arc::new(end_event), std::any::type_name::<E>(), true);
        true
    }

    /// Unregister every listener, delivering `end_event` to each.
    pub fn remove_all<E: Event<L>>(&self, end_event: E) -> usize {
        let mut registrations = lock(&self.registrations);
        let event: Arc<dyn Event<L>> = Arc::new(end_event);
        let removed: Vec<_> = registrations.drain(..).collect();
        for registration in &removed {
            registration.alive.store(false, Ordering::Release);
            self.enqueue(
                Arc::clone(registration),
                Arc::clone(&event),
                std::any::type_name::<E>(),
                true,
            );
        }
        removed.len()
    }

    /// Deliver `event` to every listener registered right now.
    pub fn dispatch<E: Event<L>>(&self, event: E) {
        let registrations = lock(&self.registrations);
        if registrations.is_empty() {
            return;
        }

        let event: Arc<dyn Event<L>> = Arc::new(event);
        for registration in registrations.iter() {
            self.enqueue(
                Arc::clone(registration),
                Arc::clone(&event),
                std::any::type_name::<E>(),
                false,
            );
        }
    }

    /// Deliver `event` to `listener` only, registered or not.
    pub fn dispatch_single<E: Event<L>>(&self, event: E, listener: Arc<L>) {
        let registrations = lock(&self.registrations);
        let registration = registrations
            .iter()
            .find(|r| r.is(&listener))
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(ListenerRegistration::new(listener)));
        self.enqueue(registration, Arc::new(event), std::any::type_name::<E>(), true);
    }

    /// Snapshot of the registered listeners, in registration order.
    pub fn listeners(&self) -> Vec<Arc<L>> {
        lock(&self.registrations).iter().map(|r| Arc::clone(&r.listener)).collect()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registrations).len()
    }

    /// Wait until every delivery queued so far has run.
    pub fn join(&self) -> Result<(), ExecutorError> {
        self.worker.join()
    }

    fn enqueue(
        &self,
        registration: Arc<ListenerRegistration<L>>,
        event: Arc<dyn Event<L>>,
        event_type: &'static str,
        forced: bool,
    ) {
        let dispatcher = Arc::clone(&self.name);
        let task = Box::new(move || {
            if !forced && !registration.is_alive() {
                tracing::trace!(
                    target: "pushnet::dispatch",
                    dispatcher = %dispatcher,
                    event = event_type,
                    "listener removed before delivery, skipping"
                );
                return;
            }

            let delivery = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                event.apply_to(&registration.listener);
            }));
            if let Err(payload) = delivery {
                tracing::error!(
                    target: "pushnet::dispatch",
                    dispatcher = %dispatcher,
                    event = event_type,
                    listener = ?identity(&registration.listener),
                    panic = %panic_message(payload.as_ref()),
                    "listener failed while handling event"
                );
                tracing::debug!(
                    target: "pushnet::dispatch",
                    dispatcher = %dispatcher,
                    event = event_type,
                    listener = ?identity(&registration.listener),
                    forced,
                    payload = panic_payload_kind(payload.as_ref()),
                    detail = ?panic_message(payload.as_ref()),
                    "listener failure detail"
                );
            }
        });

        if let Err(e) = self.worker.submit(task) {
            tracing::error!(
                target: "pushnet::dispatch",
                dispatcher = %self.name,
                event = event_type,
                error = %e,
                "event dropped"
            );
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> fmt::Debug for EventDispatcher<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .field("worker", &self.worker)
            .finish()
    }
}
