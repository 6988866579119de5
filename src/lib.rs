//! # pushnet
//!
//! Transport core of a push-streaming client.
//!
//! `pushnet` delivers asynchronous notifications to listeners in order and
//! on a single logical timeline, and manages the pooled connections (direct
//! or tunneled through an HTTP proxy) the streaming transport runs on.
//!
//! ## Features
//!
//! - **Ordered Delivery**: one FIFO worker per dispatcher, panics in listeners contained
//! - **Joinable Executors**: threads exit when idle and come back on demand
//! - **Connection Pooling**: one pool per endpoint, healthy connections reused
//! - **Proxy Tunnels**: HTTP CONNECT with basic authentication
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pushnet::dispatch::EventDispatcher;
//! use pushnet::socket::{ConnectionPoolManager, EndpointKey, TcpConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let events = Arc::new(EventDispatcher::with_shared_worker("pool"));
//!     let pools = ConnectionPoolManager::new(TcpConnector::new()).with_events(events);
//!
//!     let key = EndpointKey::new("push.example.com", 80);
//!     let (pool, conn) = pools.acquire(&key).await.unwrap();
//!     // ... stream ...
//!     pool.release(conn);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`executor`] - Joinable worker and scheduler, executor factory
//! - [`dispatch`] - Event dispatcher
//! - [`socket`] - Connection pooling, proxy tunnel, TLS sockets

pub mod base;
pub mod dispatch;
pub mod executor;
pub mod socket;
