//! Transparent L4 relay.
//!
//! This module provides:
//! - TCP listener with an IP allow-list at accept time
//! - TLS/plaintext classification from the first bytes
//! - SNI extraction from the ClientHello and Host extraction from HTTP/1.x
//! - Wildcard domain allow-list
//! - Backend selection and bidirectional relay with half-close
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> IP check -> Sniff -> SNI / Host -> Domain check -> Select -> Backend
//!                                    |                                                 ^
//!                                    +------------- consumed bytes replayed -----------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tlsmux_relay::{Config, Listener};
//!
//! let config = Config::from_args(args)?;
//! let listener = Arc::new(Listener::bind(&config).await?);
//! listener.run().await?;
//! ```

mod domain;
mod http;
mod listener;
mod relay;
mod sni;
mod sniff;
mod target;

pub use domain::{DomainError, DomainPattern, DomainPolicy, RoutingMode, ALLOW_ANY};
pub use http::{read_http_host, HttpHead, HttpRequestError, MAX_HEADERS, MAX_HEAD_BYTES};
pub use listener::{ActiveConnections, ConnectionGuard, ConnectionInfo, Dispatcher, Listener};
pub use relay::{relay, DuplexStream, RelayStats};
pub use sni::{parse_client_hello, read_client_hello, ClientHello, ClientHelloError};
pub use sniff::{sniff, ProtocolKind, Sniffed, SNIFF_BUFFER_SIZE, TLS_HANDSHAKE_RECORD};
pub use target::{
    select_target, validate_host_port, BackendTarget, PLAINTEXT_BACKEND, TLS_BACKEND,
};
