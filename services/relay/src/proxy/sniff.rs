//! Protocol classification from the first bytes of a connection.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ConnectionError;

/// Size of the single initial read.
pub const SNIFF_BUFFER_SIZE: usize = 1024;

/// TLS record content type for handshake messages.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Kind of traffic on an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// Starts with a TLS handshake record.
    Tls,
    /// Anything else; expected to be an HTTP/1.x request.
    Plaintext,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Tls => f.write_str("tls"),
            ProtocolKind::Plaintext => f.write_str("plaintext"),
        }
    }
}

/// Outcome of the initial read.
#[derive(Debug, Clone)]
pub struct Sniffed {
    pub kind: ProtocolKind,
    /// Bytes consumed by the read; they must reach the backend unchanged.
    pub bytes: Vec<u8>,
}

/// Classify a freshly accepted stream with one bounded read.
pub async fn sniff<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Sniffed, ConnectionError> {
    let mut buf = vec![0u8; SNIFF_BUFFER_SIZE];
    let n = stream.read(&mut buf).await.map_err(ConnectionError::Read)?;
    if n == 0 {
        return Err(ConnectionError::EmptyRead);
    }
    buf.truncate(n);

    let kind = if buf[0] == TLS_HANDSHAKE_RECORD {
        ProtocolKind::Tls
    } else {
        ProtocolKind::Plaintext
    };

    Ok(Sniffed { kind, bytes: buf })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_sniff_tls() {
        let mut stream = Builder::new().read(&[0x16, 0x03, 0x01, 0x00, 0x05]).build();
        let sniffed = sniff(&mut stream).await.unwrap();
        assert_eq!(sniffed.kind, ProtocolKind::Tls);
        assert_eq!(sniffed.bytes, vec![0x16, 0x03, 0x01, 0x00, 0x05]);
    }

    #[tokio::test]
    async fn test_sniff_plaintext() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut stream = Builder::new().read(request).build();
        let sniffed = sniff(&mut stream).await.unwrap();
        assert_eq!(sniffed.kind, ProtocolKind::Plaintext);
        assert_eq!(sniffed.bytes, request.to_vec());
    }

    #[tokio::test]
    async fn test_sniff_is_a_single_bounded_read() {
        let big = vec![b'a'; SNIFF_BUFFER_SIZE + 100];
        let mut stream: &[u8] = &big;
        let sniffed = sniff(&mut stream).await.unwrap();
        assert_eq!(sniffed.bytes.len(), SNIFF_BUFFER_SIZE);
        assert_eq!(stream.len(), 100);
    }

    #[tokio::test]
    async fn test_sniff_empty_stream() {
        let mut stream: &[u8] = &[];
        assert!(matches!(
            sniff(&mut stream).await,
            Err(ConnectionError::EmptyRead)
        ));
    }

    #[tokio::test]
    async fn test_sniff_read_error() {
        let mut stream = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        assert!(matches!(
            sniff(&mut stream).await,
            Err(ConnectionError::Read(_))
        ));
    }
}
