//! tlsmux relay
//!
//! Transparent L4 relay that serves TLS and plaintext HTTP on one port,
//! filters by peer address and by SNI or Host, and forwards the untouched
//! byte stream to a backend.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::{Args, Config, ConfigError};
pub use error::ConnectionError;
pub use proxy::{
    ActiveConnections, BackendTarget, Dispatcher, DomainPolicy, Listener, ProtocolKind,
    RelayStats, RoutingMode,
};
