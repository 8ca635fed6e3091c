//! Bidirectional byte relay with half-close semantics.
//!
//! The relay only needs three capabilities from either side: read, write, and
//! closing the write direction. Those are `AsyncRead`, `AsyncWrite` and
//! `AsyncWrite::poll_shutdown`; no concrete socket type is assumed.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ConnectionError;

const COPY_BUFFER_SIZE: usize = 8192;

/// A duplex byte stream whose write side can be closed independently.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to backend, including the replayed prefix.
    pub bytes_to_backend: u64,
    /// Backend to client.
    pub bytes_from_backend: u64,
}

/// Outcome of one copy direction.
#[derive(Debug)]
struct HalfOutcome {
    bytes: u64,
    error: Option<io::Error>,
}

/// Relay between `client` and `backend` until both directions finish.
///
/// `prefix` (bytes already consumed from the client) is written to the backend
/// first. Each direction then copies until its source reaches EOF or fails,
/// and shuts down the write side of its destination either way so the
/// opposite direction can keep draining. Both streams are closed on return.
pub async fn relay<C, B>(
    client: C,
    mut backend: B,
    prefix: &[u8],
) -> Result<RelayStats, ConnectionError>
where
    C: DuplexStream,
    B: DuplexStream,
{
    if !prefix.is_empty() {
        if let Err(e) = backend.write_all(prefix).await {
            let _ = backend.shutdown().await;
            return Err(ConnectionError::Forward(e));
        }
    }

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let (upstream, downstream) = tokio::join!(
        copy_half(&mut client_read, &mut backend_write),
        copy_half(&mut backend_read, &mut client_write),
    );

    if let Some(e) = &upstream.error {
        debug!(error = %e, "Client to backend copy ended with error");
    }
    if let Some(e) = &downstream.error {
        debug!(error = %e, "Backend to client copy ended with error");
    }

    // Dropping the reunited halves closes both sockets.
    drop(client_read.unsplit(client_write));
    drop(backend_read.unsplit(backend_write));

    Ok(RelayStats {
        bytes_to_backend: prefix.len() as u64 + upstream.bytes,
        bytes_from_backend: downstream.bytes,
    })
}

/// Copy `reader` into `writer` until EOF or error, then half-close `writer`.
async fn copy_half<R, W>(reader: &mut R, writer: &mut W) -> HalfOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    break Some(e);
                }
                bytes += n as u64;
            }
            Err(e) => break Some(e),
        }
    };

    // The peer may already be gone; a failed shutdown changes nothing here.
    let _ = writer.shutdown().await;

    HalfOutcome { bytes, error }
}
