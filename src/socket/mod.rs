//! Transport connections.
//!
//! - [`pool`]: one [`pool::ChannelPool`] per [`pool::EndpointKey`], idle reuse
//! - [`connectjob`]: DNS → TCP → CONNECT tunnel → TLS
//! - [`tunnel`]: HTTP CONNECT handshake state machine
//! - [`proxy`]: proxy settings and credentials
//! - [`client`]: sockets, layer stacks and established connections
//! - [`events`]: pool lifecycle notifications

pub mod client;
pub mod connectjob;
pub mod events;
pub mod pool;
pub mod proxy;
pub mod tunnel;

pub use client::{Connection, Layer, LayerStack, Poolable};
pub use connectjob::{ConnectJob, TcpConnector};
pub use events::{PoolEvent, PoolListener};
pub use pool::{
    ChannelPool, ConnectionPoolManager, Connector, EndpointKey, PoolConfig, PooledConnection,
    TransportKind,
};
pub use proxy::{ProxyBuilder, ProxySettings, ProxyType};
pub use tunnel::{HandshakeState, ProxyTunnelHandshake};
