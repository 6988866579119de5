//! Pool lifecycle notifications.
//!
//! Purely observational: listeners see what the pool did, they never take
//! part in deciding it.

use crate::base::neterror::NetError;
use crate::dispatch::Event;
use crate::socket::pool::EndpointKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// First request for this key created its pool.
    PoolCreated { key: EndpointKey },
    /// A new connection was opened (after any proxy tunnel).
    ConnectionCreated { key: EndpointKey, id: u64 },
    /// A connection was leased; `reused` if it came from the idle set.
    Acquired { key: EndpointKey, id: u64, reused: bool },
    /// A lease came back; `idle` if it was kept for reuse.
    Released { key: EndpointKey, id: u64, idle: bool },
    /// A connection was dropped (dead, over the idle limit, or discarded by its holder).
    Discarded { key: EndpointKey, id: u64 },
    /// Opening a connection failed.
    ConnectFailed { key: EndpointKey, error: NetError },
    /// The pool was closed, dropping this many idle connections.
    PoolClosed { key: EndpointKey, closed: usize },
}

impl PoolEvent {
    pub fn key(&self) -> &EndpointKey {
        match self {
            PoolEvent::PoolCreated { key }
            | PoolEvent::ConnectionCreated { key, .. }
            | PoolEvent::Acquired { key, .. }
            | PoolEvent::Released { key, .. }
            | PoolEvent::Discarded { key, .. }
            | PoolEvent::ConnectFailed { key, .. }
            | PoolEvent::PoolClosed { key, .. } => key,
        }
    }
}

/// Receives [`PoolEvent`]s through an
/// [`EventDispatcher<dyn PoolListener>`](crate::dispatch::EventDispatcher).
pub trait PoolListener: Send + Sync {
    fn on_pool_event(&self, event: &PoolEvent);

    /// Delivered once when the listener is registered.
    fn on_listen_start(&self) {}

    /// Delivered once when the listener is removed.
    fn on_listen_end(&self) {}
}

impl Event<dyn PoolListener> for PoolEvent {
    fn apply_to(&self, listener: &(dyn PoolListener + 'static)) {
        listener.on_pool_event(self);
    }
}

/// Start notification for [`PoolListener`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenStart;

impl Event<dyn PoolListener> for ListenStart {
    fn apply_to(&self, listener: &(dyn PoolListener + 'static)) {
        listener.on_listen_start();
    }
}

/// End notification for [`PoolListener`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenEnd;

impl Event<dyn PoolListener> for ListenEnd {
    fn apply_to(&self, listener: &(dyn PoolListener + 'static)) {
        listener.on_listen_end();
    }
}
