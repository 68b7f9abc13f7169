//! Captive-portal web handlers.
//!
//! The router hands a connection to one of these when the request is for
//! the gateway itself (portal, panel) or for a blocked domain. Each page
//! family implements [`WebApp`]; the router picks one by host and the app
//! dispatches on method and path.
//!
//! One request per connection: the head is parsed with `httparse`, then a
//! `Content-Length` body is read and the response written.

mod block;
mod panel;
mod portal;
mod users;

use std::fmt::Write as _;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub use block::BlockPage;
pub use panel::PanelApp;
pub use portal::PortalApp;
pub use users::{HotspotUser, UserDirectory, UserError};

/// Longest request or header line accepted.
pub const MAX_LINE_LEN: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_BODY_LEN: usize = 64 * 1024;

/// Time a client gets to deliver the rest of its request and its body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed request.
#[derive(Debug, Clone)]
pub struct WebRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub client_ip: IpAddr,
}

impl WebRequest {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Lowercased `Host` header without a port.
    pub fn host(&self) -> Option<String> {
        self.header("Host").map(normalize_host)
    }
}

/// A response to be serialized onto the connection.
#[derive(Debug, Clone)]
pub struct WebResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WebResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body)
    }

    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    pub fn redirect(location: &str) -> Self {
        Self::new(302).with_header("Location", location)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Serialize, filling in `Content-Type` and `Content-Length` when the
    /// handler left them out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(128 + self.body.len());
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        if !self.has_header("Content-Type") {
            out.push_str("Content-Type: text/plain\r\n");
        }
        if !self.has_header("Content-Length") {
            let _ = write!(out, "Content-Length: {}\r\n", self.body.len());
        }
        out.push_str("Connection: close\r\n\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A page family served by the gateway.
pub trait WebApp: Send + Sync {
    fn handle(&self, request: &WebRequest) -> WebResponse;
}

/// Strip an optional port and trailing dot, and lowercase.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let is_port = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let host = match host.rsplit_once(':') {
        // `name` ending in ':' means a bare IPv6 literal such as `fe80::1`.
        Some((name, port)) if is_port(port) && !name.ends_with(':') => name,
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Read one line (up to and including `\n`) into `line`, refusing lines
/// longer than [`MAX_LINE_LEN`]. Returns 0 at end of stream.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize> {
    line.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', line)
        .await?;
    if n == MAX_LINE_LEN && line.last() != Some(&b'\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    Ok(n)
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("request head too large")]
    HeadTooLarge,
    #[error("connection closed inside the request head")]
    Incomplete,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parse a request whose first lines (`head`) were already consumed from
/// the connection, reading any remaining headers and the body from `reader`.
///
/// Header lines are pulled one at a time so nothing past the blank line is
/// consumed before the body read.
pub async fn read_request<R: AsyncBufRead + Unpin>(
    head: &[u8],
    reader: &mut R,
    client_ip: IpAddr,
) -> Result<WebRequest, RequestError> {
    let mut raw = head.to_vec();
    let mut line = Vec::new();
    let mut request = loop {
        if let Some(request) = parse_head(&raw, client_ip)? {
            break request;
        }
        if raw.len() > MAX_HEAD_LEN {
            return Err(RequestError::HeadTooLarge);
        }
        if read_line(reader, &mut line).await? == 0 {
            return Err(RequestError::Incomplete);
        }
        raw.extend_from_slice(&line);
    };

    let content_length = request
        .header("Content-Length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_BODY_LEN);
    if content_length > 0 {
        let mut body = Vec::with_capacity(content_length);
        (&mut *reader)
            .take(content_length as u64)
            .read_to_end(&mut body)
            .await?;
        request.body = String::from_utf8_lossy(&body).into_owned();
    }

    Ok(request)
}

/// `None` until `raw` holds a complete head.
fn parse_head(raw: &[u8], client_ip: IpAddr) -> Result<Option<WebRequest>, RequestError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(_) = parsed.parse(raw)? else {
        return Ok(None);
    };

    Ok(Some(WebRequest {
        method: parsed.method.unwrap_or_default().to_string(),
        path: parsed.path.unwrap_or_default().to_string(),
        version: format!("HTTP/1.{}", parsed.version.unwrap_or(1)),
        headers: parsed
            .headers
            .iter()
            .map(|header| {
                let value = String::from_utf8_lossy(header.value);
                (header.name.to_string(), value.trim().to_string())
            })
            .collect(),
        body: String::new(),
        client_ip,
    }))
}

/// Read the rest of the request, run `app`, and write its response.
/// A malformed request is answered with 400. The whole read, body
/// included, must finish within [`REQUEST_TIMEOUT`].
pub async fn serve<S>(app: &dyn WebApp, head: &[u8], stream: &mut S, client_ip: IpAddr) -> io::Result<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let read = tokio::time::timeout(REQUEST_TIMEOUT, read_request(head, stream, client_ip))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request not received in time"))?;
    let response = match read {
        Ok(request) => app.handle(&request),
        Err(RequestError::Io(e)) => return Err(e),
        Err(e) => {
            debug!(client = %client_ip, "rejecting request: {e}");
            WebResponse::new(400).with_body("400 Bad Request")
        }
    };

    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await
}
