//! Byte tunnel between a client and the real destination.

use std::io;
use std::pin::pin;

use futures::future::{Either, select};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::gateway::GatewayState;

const PUMP_BUFFER_LEN: usize = 8192;

/// Resolve `host`, connect to it on `port`, send `prefix` (bytes already
/// read from the client), then copy in both directions until either side
/// finishes. The other direction is dropped at that point.
pub(super) async fn proxy(
    client: TcpStream,
    host: &str,
    port: u16,
    prefix: &[u8],
    state: &GatewayState,
) -> io::Result<()> {
    let addresses = state.upstream.resolve_a(host).await?;
    let Some(&address) = addresses.first() else {
        return Err(io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")));
    };

    let mut target = TcpStream::connect((address, port)).await?;
    if !prefix.is_empty() {
        target.write_all(prefix).await?;
    }

    let stats = &state.proxy_stats;
    let _tunnel = stats.open_tunnel();
    debug!(host, target = %address, port, "tunnel open");

    let (mut client_read, mut client_write) = client.into_split();
    let (mut target_read, mut target_write) = target.into_split();

    let inbound = pin!(pump(&mut client_read, &mut target_write, |n| stats.add_input(n)));
    let outbound = pin!(pump(&mut target_read, &mut client_write, |n| stats.add_output(n)));

    let (direction, result) = match select(inbound, outbound).await {
        Either::Left((result, _)) => ("client", result),
        Either::Right((result, _)) => ("target", result),
    };
    match result {
        Ok(bytes) => debug!(host, closed_by = direction, bytes, "tunnel closed"),
        Err(e) => debug!(host, closed_by = direction, "tunnel broken: {e}"),
    }
    Ok(())
}

/// Copy `from` into `to` until end of stream, reporting each chunk after it
/// is written. Returns the total copied.
async fn pump<R, W>(from: &mut R, to: &mut W, count: impl Fn(u64)) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_LEN];
    let mut total = 0u64;
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        to.write_all(&buf[..n]).await?;
        count(n as u64);
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::gateway::GatewayConfig;
    use crate::gateway::tests::{test_config, test_policy};
    use crate::upstream::tests::spawn_fake_upstream;

    /// Echo server that first reports what it received before echoing.
    async fn spawn_echo_target() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                if socket.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        });
        addr
    }

    async fn state_for(target: SocketAddr) -> Arc<GatewayState> {
        let (upstream, _) = spawn_fake_upstream(Ipv4Addr::LOCALHOST, 300).await;
        let config = GatewayConfig {
            forward_dns: upstream,
            http_target_port: target.port(),
            ..test_config()
        };
        Arc::new(GatewayState::new(config, Arc::new(test_policy())))
    }

    /// Connected (client side, gateway side) socket pair.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (client, accepted)
    }

    async fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn prefix_then_bytes_both_ways() {
        let target = spawn_echo_target().await;
        let state = state_for(target).await;
        let (mut client, accepted) = socket_pair().await;

        let tunnel_state = state.clone();
        let tunnel = tokio::spawn(async move {
            proxy(accepted, "www.proxied.test", target.port(), b"hello ", &tunnel_state).await
        });

        assert_eq!(read_exact_len(&mut client, 6).await, b"hello ");
        assert_eq!(state.proxy_stats.active_tunnels(), 1);

        client.write_all(b"world").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"world");

        // The prefix is not client traffic moved by the pumps.
        assert_eq!(state.proxy_stats.input_bytes(), 5);
        assert_eq!(state.proxy_stats.output_bytes(), 11);
        assert_eq!(state.proxy_stats.reset_rates(), (5, 11));
        assert_eq!(state.proxy_stats.input_bytes(), 0);

        drop(client);
        tokio::time::timeout(Duration::from_secs(2), tunnel)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(state.proxy_stats.active_tunnels(), 0);
    }

    #[tokio::test]
    async fn unreachable_target_is_an_error() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        let state = state_for(SocketAddr::from(([127, 0, 0, 1], port))).await;
        let (_client, accepted) = socket_pair().await;

        assert!(proxy(accepted, "www.proxied.test", port, b"", &state).await.is_err());
        assert_eq!(state.proxy_stats.active_tunnels(), 0);
    }
}
