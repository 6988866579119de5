//! Ordered, isolated delivery of events to listeners.
//!
//! Events may be produced on any thread (every pooled connection has its own
//! I/O task) but listeners see them one at a time, in submission order, on
//! the dispatcher's worker. Listener code can therefore be written as if it
//! were single-threaded.
//!
//! ```text
//! producer threads ──► EventDispatcher::dispatch(event)
//!                          │  (snapshot live registrations under lock)
//!                          ├──► task(listener A) ─┐
//!                          └──► task(listener B) ─┴──► JoinableWorker (FIFO)
//!                                                        └─► apply_to(), panics contained
//! ```

pub mod dispatcher;
pub mod event;

pub use dispatcher::{EventDispatcher, ListenerRegistration};
pub use event::Event;
