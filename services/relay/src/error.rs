//! Error types for the relay.

use std::io;

use thiserror::Error;

use crate::proxy::{ClientHelloError, HttpRequestError, ProtocolKind};

/// Per-connection errors with standardized reason codes.
///
/// None of these ever leave the connection task; they end up in the log.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Peer address or routing key rejected by policy.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Client closed before sending anything.
    #[error("client closed before sending data")]
    EmptyRead,

    /// Initial or continuation read from the client failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Malformed TLS record, handshake or extension block.
    #[error("client hello: {0}")]
    ClientHello(#[from] ClientHelloError),

    /// Malformed plaintext HTTP request head.
    #[error("http request: {0}")]
    HttpRequest(#[from] HttpRequestError),

    /// No backend configured for this kind of traffic.
    #[error("no backend available for {kind} traffic ({configured} configured)")]
    NoBackend {
        kind: ProtocolKind,
        configured: usize,
    },

    /// Backend unreachable.
    #[error("dial {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Writing the buffered client prefix to the backend failed.
    #[error("forwarding buffered bytes failed: {0}")]
    Forward(#[source] io::Error),
}

impl ConnectionError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ConnectionError::AccessDenied(_) => "access_denied",
            ConnectionError::EmptyRead => "empty_read",
            ConnectionError::Read(_) => "read_error",
            ConnectionError::ClientHello(ClientHelloError::Io(_)) => "read_error",
            ConnectionError::ClientHello(_) => "protocol_parse_error",
            ConnectionError::HttpRequest(HttpRequestError::Io(_)) => "read_error",
            ConnectionError::HttpRequest(_) => "protocol_parse_error",
            ConnectionError::NoBackend { .. } => "no_backend",
            ConnectionError::Dial { .. } => "dial_error",
            ConnectionError::Forward(_) => "copy_error",
        }
    }
}
