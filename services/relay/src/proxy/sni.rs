//! SNI (Server Name Indication) extraction from a TLS ClientHello.
//!
//! Exactly one TLS handshake record is buffered and walked far enough to find
//! the `server_name` extension. No TLS state is created: the record is kept
//! byte-for-byte so it can be replayed to the backend.
//!
//! Every length field comes from the peer, so all slicing goes through
//! `Cursor`, which checks the remaining length before handing out bytes.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::sniff::TLS_HANDSHAKE_RECORD;

/// TLS record header: content type, version, 2-byte length.
pub const RECORD_HEADER_LEN: usize = 5;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Errors raised while buffering or parsing a ClientHello.
#[derive(Debug, Error)]
pub enum ClientHelloError {
    /// First byte is not the handshake content type.
    #[error("record content type {0:#04x} is not handshake")]
    NotHandshake(u8),

    /// Record header declares a zero-length body.
    #[error("record declares zero length")]
    EmptyRecord,

    /// Handshake message is something other than ClientHello.
    #[error("handshake type {0} is not ClientHello")]
    NotClientHello(u8),

    /// A length prefix points past the end of its enclosing block.
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// The server name entry is not a host_name.
    #[error("unsupported server name type {0}")]
    UnsupportedNameType(u8),

    /// The host_name bytes are not UTF-8.
    #[error("server name is not valid UTF-8")]
    InvalidServerName,

    /// Client closed before the full record arrived.
    #[error("connection closed before the record was complete")]
    UnexpectedEof,

    /// Continuation read failed.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// A fully buffered ClientHello record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Requested hostname, if the client sent one.
    pub server_name: Option<String>,
    /// Every byte consumed from the client, in order.
    pub bytes: Vec<u8>,
}

/// Buffer one TLS handshake record and extract its SNI hostname.
///
/// `prefix` holds bytes already read from `stream` (the sniffed prefix).
/// Further reads are sized to what the record header still requires, so
/// nothing past the declared record length is pulled off the socket.
pub async fn read_client_hello<R: AsyncRead + Unpin>(
    stream: &mut R,
    prefix: Vec<u8>,
) -> Result<ClientHello, ClientHelloError> {
    let mut buf = prefix;

    fill_to(stream, &mut buf, RECORD_HEADER_LEN).await?;
    let record_end = record_len(&buf)? + RECORD_HEADER_LEN;
    fill_to(stream, &mut buf, record_end).await?;

    let server_name = parse_client_hello(&buf[..record_end])?;
    Ok(ClientHello {
        server_name,
        bytes: buf,
    })
}

/// Read from `stream` until `buf` holds at least `target` bytes.
async fn fill_to<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    target: usize,
) -> Result<(), ClientHelloError> {
    while buf.len() < target {
        let mut chunk = vec![0u8; target - buf.len()];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClientHelloError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

/// Validate the record header and return the declared body length.
fn record_len(data: &[u8]) -> Result<usize, ClientHelloError> {
    let mut header = Cursor::new(data);
    let content_type = header.u8("record header")?;
    if content_type != TLS_HANDSHAKE_RECORD {
        return Err(ClientHelloError::NotHandshake(content_type));
    }
    header.skip(2, "record header")?;
    let len = header.u16("record header")? as usize;
    if len == 0 {
        return Err(ClientHelloError::EmptyRecord);
    }
    Ok(len)
}

/// Parse the SNI hostname out of one complete TLS record.
///
/// TLS Record structure:
/// - byte 0: record type (0x16 = Handshake)
/// - bytes 1-2: version
/// - bytes 3-4: record length
/// - bytes 5+: handshake message
///
/// Handshake ClientHello:
/// - byte 0: handshake type (0x01 = ClientHello)
/// - bytes 1-3: length
/// - bytes 4-5: client version
/// - bytes 6-37: random (32 bytes)
/// - 1-byte length + session ID
/// - 2-byte length + cipher suites
/// - 1-byte length + compression methods
/// - 2-byte length + extensions (optional)
///
/// Returns `Ok(None)` when the ClientHello carries no server name.
pub fn parse_client_hello(record: &[u8]) -> Result<Option<String>, ClientHelloError> {
    let len = record_len(record)?;
    let mut outer = Cursor::new(record);
    outer.skip(RECORD_HEADER_LEN, "record header")?;
    let mut hello = Cursor::new(outer.take(len, "record")?);

    let msg_type = hello.u8("handshake type")?;
    if msg_type != HANDSHAKE_CLIENT_HELLO {
        return Err(ClientHelloError::NotClientHello(msg_type));
    }
    hello.skip(3, "handshake length")?;
    hello.skip(2 + 32, "client version and random")?;
    hello.u8_prefixed("session id")?;
    hello.u16_prefixed("cipher suites")?;
    hello.u8_prefixed("compression methods")?;

    // Extensions are optional in a ClientHello.
    if hello.is_empty() {
        return Ok(None);
    }

    let mut extensions = Cursor::new(hello.u16_prefixed("extensions")?);
    while !extensions.is_empty() {
        let ext_type = extensions.u16("extension type")?;
        let ext_data = extensions.u16_prefixed("extension")?;
        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(ext_data);
        }
    }

    Ok(None)
}

/// Parse the SNI extension value.
///
/// SNI extension structure:
/// - 2 bytes: list length
/// - first entry:
///   - 1 byte: name type (0 = hostname)
///   - 2 bytes: name length
///   - variable: name
fn parse_server_name(data: &[u8]) -> Result<Option<String>, ClientHelloError> {
    let mut ext = Cursor::new(data);
    let mut list = Cursor::new(ext.u16_prefixed("server name list")?);

    let name_type = list.u8("server name type")?;
    if name_type != NAME_TYPE_HOST_NAME {
        return Err(ClientHelloError::UnsupportedNameType(name_type));
    }
    let name = list.u16_prefixed("server name")?;
    if name.is_empty() {
        return Ok(None);
    }

    std::str::from_utf8(name)
        .map(|s| Some(s.to_string()))
        .map_err(|_| ClientHelloError::InvalidServerName)
}

/// Forward-only reader over untrusted bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        if n > self.remaining() {
            return Err(ClientHelloError::Truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, what: &'static str) -> Result<(), ClientHelloError> {
        self.take(n, what).map(|_| ())
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ClientHelloError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ClientHelloError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u8_prefixed(&mut self, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn u16_prefixed(&mut self, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }
}
