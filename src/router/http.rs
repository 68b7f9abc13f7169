//! Plain HTTP connections.
//!
//! Only the request line and headers up to `Host` are read here. Every byte
//! taken off the socket is kept so the request can be replayed verbatim to
//! a proxy target or handed on to a web app.

use std::io;
use std::net::IpAddr;

use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::{tunnel, within_handshake};
use crate::filter::{DomainClassification, is_connectivity_probe};
use crate::gateway::GatewayState;
use crate::web::{self, WebResponse, normalize_host};

/// Upper bound on the bytes read while looking for `Host`.
const MAX_HEAD_LEN: usize = 64 * 1024;

pub(super) async fn handle(stream: TcpStream, client_ip: IpAddr, state: &GatewayState) -> io::Result<()> {
    let mut stream = BufReader::new(stream);
    let Some((head, host)) = within_handshake(read_head(&mut stream)).await? else {
        debug!(client = %client_ip, "HTTP request without Host header");
        return Ok(());
    };
    debug!(host = %host, client = %client_ip, "HTTP request");

    if is_connectivity_probe(&host) {
        let location = format!("http://{}", state.config.portal_domain);
        let response = WebResponse::redirect(&location);
        stream.write_all(&response.to_bytes()).await?;
        return stream.flush().await;
    }

    if host.eq_ignore_ascii_case(&state.config.panel_domain) {
        return web::serve(state.panel(), &head, &mut stream, client_ip).await;
    }
    if host.eq_ignore_ascii_case(&state.config.portal_domain) {
        return web::serve(state.portal(), &head, &mut stream, client_ip).await;
    }

    let classification = state.classifier.classify(&host);
    if classification.is_blocked() && !state.caches.consent.contains(&host, client_ip) {
        if let Some(page) = state.block_page(classification) {
            debug!(host = %host, client = %client_ip, %classification, "serving block page");
            return web::serve(page, &head, &mut stream, client_ip).await;
        }
    }

    if state.needs_login(client_ip) {
        debug!(host = %host, client = %client_ip, "no session, closing");
        return Ok(());
    }

    if classification == DomainClassification::ProxyAllowed {
        let mut prefix = head;
        prefix.extend_from_slice(stream.buffer());
        return tunnel::proxy(stream.into_inner(), &host, state.config.http_target_port, &prefix, state).await;
    }

    Ok(())
}

/// Read lines until one is a `Host` header. Returns the raw bytes read and
/// the normalized host, or `None` if the head ends or the stream closes
/// first.
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<(Vec<u8>, String)>> {
    let mut head = Vec::new();
    let mut line = Vec::new();
    let mut first = true;

    loop {
        if web::read_line(reader, &mut line).await? == 0 {
            return Ok(None);
        }
        head.extend_from_slice(&line);

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }
        if !first {
            if let Some(value) = host_value(text) {
                return Ok(Some((head, normalize_host(value))));
            }
        }
        first = false;

        if head.len() > MAX_HEAD_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
    }
}

fn host_value(line: &str) -> Option<&str> {
    let (name, value) = line.split_once(':')?;
    name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn head_of(raw: &[u8]) -> Option<(Vec<u8>, String)> {
        let mut reader = BufReader::new(raw);
        read_head(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn stops_at_host_header() {
        let raw = b"GET / HTTP/1.1\r\nAccept: */*\r\nHOST: Example.COM:8080\r\nUser-Agent: t\r\n\r\n";

        let (head, host) = head_of(raw).await.unwrap();

        assert_eq!(host, "example.com");
        assert_eq!(head, b"GET / HTTP/1.1\r\nAccept: */*\r\nHOST: Example.COM:8080\r\n");
    }

    #[tokio::test]
    async fn missing_host_yields_none() {
        assert!(head_of(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await.is_none());
        assert!(head_of(b"GET / HTTP/1.1\r\nAccept: */*\r\n").await.is_none());
        assert!(head_of(b"").await.is_none());
    }

    #[tokio::test]
    async fn request_line_is_not_a_header() {
        assert!(head_of(b"Host: a.test\r\n\r\n").await.is_none());
    }

    #[test]
    fn host_value_parsing() {
        assert_eq!(host_value("host:a.test"), Some("a.test"));
        assert_eq!(host_value("Hostname: a.test"), None);
        assert_eq!(host_value("no colon"), None);
    }
}
