//! HTTPS connections, routed by the SNI of the first read.

use std::io;
use std::net::IpAddr;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{tunnel, within_handshake};
use crate::filter::DomainClassification;
use crate::gateway::GatewayState;
use crate::tls::{MAX_CLIENT_HELLO_LEN, extract_sni};

/// Blocked names are closed without a reply: there is no way to show a
/// page inside a TLS session the gateway does not terminate.
pub(super) async fn handle(mut stream: TcpStream, client_ip: IpAddr, state: &GatewayState) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_CLIENT_HELLO_LEN];
    let len = within_handshake(stream.read(&mut buf)).await?;
    if len == 0 {
        return Ok(());
    }
    let hello = &buf[..len];

    let Some(sni) = extract_sni(hello) else {
        debug!(client = %client_ip, "no SNI in first read, closing");
        return Ok(());
    };
    debug!(host = %sni, client = %client_ip, "HTTPS connection");

    let classification = state.classifier.classify(&sni);
    if classification.is_blocked() && !state.caches.consent.contains(&sni, client_ip) {
        debug!(host = %sni, client = %client_ip, %classification, "blocked, closing");
        return Ok(());
    }

    if state.needs_login(client_ip) {
        debug!(host = %sni, client = %client_ip, "no session, closing");
        return Ok(());
    }

    if classification == DomainClassification::ProxyAllowed {
        return tunnel::proxy(stream, &sni, state.config.https_target_port, hello, state).await;
    }

    Ok(())
}
