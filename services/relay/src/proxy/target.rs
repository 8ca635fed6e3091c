//! Backend targets and per-connection target selection.

use std::fmt;

use rand::Rng;

use super::domain::RoutingMode;
use super::sniff::ProtocolKind;
use crate::error::ConnectionError;

/// A configured backend `host:port`.
///
/// The host part may be a name; it is resolved on every dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTarget(String);

impl BackendTarget {
    /// Validate a `host:port` string.
    pub fn new(addr: &str) -> Result<Self, String> {
        validate_host_port(addr).map(|addr| Self(addr.to_string()))
    }

    /// Address string suitable for `TcpStream::connect`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `addr` has the `host:port` shape and return it trimmed.
///
/// The host may be a name, an IPv4 literal or a bracketed IPv6 literal.
/// Nothing is resolved here.
pub fn validate_host_port(addr: &str) -> Result<&str, String> {
    let addr = addr.trim();
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("missing port in address {:?}", addr));
    };
    if host.is_empty() || host == "[]" {
        return Err(format!("missing host in address {:?}", addr));
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(format!("IPv6 address must be bracketed: {:?}", addr));
    }
    port.parse::<u16>()
        .map_err(|_| format!("invalid port in address {:?}", addr))?;

    Ok(addr)
}

/// Index of the plaintext backend in protocol routing mode.
pub const PLAINTEXT_BACKEND: usize = 0;

/// Index of the TLS backend in protocol routing mode.
pub const TLS_BACKEND: usize = 1;

/// Choose the backend for one connection.
///
/// - One backend: always that backend.
/// - [`RoutingMode::ByProtocol`]: plaintext to index 0, TLS to index 1;
///   backends past index 1 are never used.
/// - [`RoutingMode::Multiplex`]: uniformly random over all backends.
pub fn select_target(
    kind: ProtocolKind,
    backends: &[BackendTarget],
    mode: RoutingMode,
) -> Result<&BackendTarget, ConnectionError> {
    let index = match (backends.len(), mode, kind) {
        (1, _, _) => 0,
        (n, RoutingMode::Multiplex, _) if n > 1 => rand::rng().random_range(0..n),
        (_, RoutingMode::ByProtocol, ProtocolKind::Plaintext) => PLAINTEXT_BACKEND,
        (_, RoutingMode::ByProtocol, ProtocolKind::Tls) => TLS_BACKEND,
        (_, RoutingMode::Multiplex, _) => PLAINTEXT_BACKEND,
    };

    backends.get(index).ok_or(ConnectionError::NoBackend {
        kind,
        configured: backends.len(),
    })
}
