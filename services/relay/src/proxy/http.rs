//! Host extraction from a plaintext HTTP/1.x request head.
//!
//! The head is parsed with `httparse` over an accumulating buffer that starts
//! with the sniffed prefix. All bytes read stay in the buffer, including any
//! body bytes that arrived with the head, so the backend sees the client's
//! stream unchanged.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the request head (request line plus headers).
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Maximum number of headers accepted in a request head.
pub const MAX_HEADERS: usize = 64;

const READ_CHUNK: usize = 4096;

/// Errors raised while reading a request head.
#[derive(Debug, Error)]
pub enum HttpRequestError {
    /// Request line or headers are not valid HTTP/1.x.
    #[error("malformed request: {0}")]
    Malformed(#[from] httparse::Error),

    /// Head did not terminate within the size limit.
    #[error("request head exceeds {} bytes", MAX_HEAD_BYTES)]
    HeadTooLarge,

    /// More than one Host header.
    #[error("multiple Host headers")]
    DuplicateHost,

    /// Host header value is not valid UTF-8.
    #[error("Host header is not valid UTF-8")]
    InvalidHost,

    /// Client closed before the head was complete.
    #[error("connection closed before the request head was complete")]
    UnexpectedEof,

    /// Continuation read failed.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// A buffered request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    /// Requested host without port, if the request named one.
    pub host: Option<String>,
    /// Every byte consumed from the client, in order.
    pub bytes: Vec<u8>,
}

/// Read a request head from `stream` and return its target host.
///
/// `prefix` holds bytes already read from `stream`.
pub async fn read_http_host<R: AsyncRead + Unpin>(
    stream: &mut R,
    prefix: Vec<u8>,
) -> Result<HttpHead, HttpRequestError> {
    let mut buf = prefix;

    loop {
        if let httparse::Status::Complete(host) = parse_head(&buf)? {
            return Ok(HttpHead { host, bytes: buf });
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(HttpRequestError::HeadTooLarge);
        }

        let mut chunk = vec![0u8; READ_CHUNK.min(MAX_HEAD_BYTES - buf.len())];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpRequestError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Try to parse a complete head out of `buf`.
fn parse_head(buf: &[u8]) -> Result<httparse::Status<Option<String>>, HttpRequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf)? {
        httparse::Status::Partial => Ok(httparse::Status::Partial),
        httparse::Status::Complete(_) => Ok(httparse::Status::Complete(request_host(&req)?)),
    }
}

/// Resolve the target host the way an HTTP/1.1 server would.
///
/// An absolute-form target (`GET http://host/path`) or a CONNECT authority
/// takes precedence over the Host header.
fn request_host(req: &httparse::Request<'_, '_>) -> Result<Option<String>, HttpRequestError> {
    let target_authority = match (req.method, req.path) {
        (Some(method), Some(path)) if method.eq_ignore_ascii_case("CONNECT") => Some(path),
        (_, Some(path)) => absolute_form_authority(path),
        _ => None,
    };
    if let Some(authority) = target_authority {
        return Ok(non_empty(strip_port(authority)));
    }

    let mut hosts = req
        .headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("host"));
    let Some(header) = hosts.next() else {
        return Ok(None);
    };
    if hosts.next().is_some() {
        return Err(HttpRequestError::DuplicateHost);
    }

    let value = std::str::from_utf8(header.value).map_err(|_| HttpRequestError::InvalidHost)?;
    Ok(non_empty(strip_port(value.trim())))
}

fn absolute_form_authority(path: &str) -> Option<&str> {
    let (scheme, rest) = path.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    // userinfo is not part of the host
    Some(authority.rsplit_once('@').map_or(authority, |(_, host)| host))
}

/// Strip an optional `:port`, unwrapping bracketed IPv6 literals.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(ip, _)| ip);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn non_empty(host: &str) -> Option<String> {
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
