//! TCP interception engine.
//!
//! Two accept loops, one for plain HTTP and one for HTTPS. Each accepted
//! connection runs in its own task, is classified by its `Host` header or
//! SNI, and is then either answered by a gateway web app, dropped, or
//! tunnelled to the real destination.

mod http;
mod https;
mod tunnel;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::access;
use crate::error::{GatewayError, Result};
use crate::gateway::GatewayState;
use crate::stats::format_bytes;

/// Time a client gets to send its request head or ClientHello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Throughput counters are zeroed on this tick so they read as a rate.
const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
enum Scheme {
    Http,
    Https,
}

pub struct Router {
    http: TcpListener,
    https: TcpListener,
    http_addr: SocketAddr,
    https_addr: SocketAddr,
    state: Arc<GatewayState>,
}

impl Router {
    /// Bind the HTTP and HTTPS listeners.
    pub async fn bind(state: Arc<GatewayState>) -> Result<Self> {
        let (http, http_addr) = listen(state.config.http_bind).await?;
        let (https, https_addr) = listen(state.config.https_bind).await?;

        Ok(Self {
            http,
            https,
            http_addr,
            https_addr,
            state,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn https_addr(&self) -> SocketAddr {
        self.https_addr
    }

    /// Accept until `shutdown` fires. Open connections and tunnels are not
    /// interrupted.
    pub async fn run(self, shutdown: CancellationToken) {
        tokio::join!(
            accept_loop(self.http, Scheme::Http, self.state.clone(), shutdown.clone()),
            accept_loop(self.https, Scheme::Https, self.state.clone(), shutdown.clone()),
            reset_rates(self.state, shutdown),
        );
    }
}

async fn listen(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let bind = async {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        Ok::<_, io::Error>((listener, local))
    };
    bind.await.map_err(|source| GatewayError::Bind { addr, source })
}

async fn accept_loop(listener: TcpListener, scheme: Scheme, state: Arc<GatewayState>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(r) => r,
                Err(e) => {
                    warn!(?scheme, "TCP accept error: {e}");
                    continue;
                }
            },
        };

        let client_ip = access::canonical(peer.ip());
        if !state.config.allowed_ips.allows(client_ip) {
            debug!(client = %peer, "dropping connection from disallowed address");
            continue;
        }

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, scheme, client_ip, &state).await {
                debug!(?scheme, client = %peer, "connection ended: {e}");
            }
        });
    }

    debug!(?scheme, "accept loop stopped");
}

async fn handle_connection(stream: TcpStream, scheme: Scheme, client_ip: IpAddr, state: &GatewayState) -> io::Result<()> {
    match scheme {
        Scheme::Http => http::handle(stream, client_ip, state).await,
        Scheme::Https => https::handle(stream, client_ip, state).await,
    }
}

async fn reset_rates(state: Arc<GatewayState>, shutdown: CancellationToken) {
    let stats = &state.proxy_stats;
    let mut interval = tokio::time::interval(RATE_WINDOW);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let (input, output) = stats.reset_rates();
        let tunnels = stats.active_tunnels();
        if input > 0 || output > 0 || tunnels > 0 {
            debug!(
                input = %format_bytes(input),
                output = %format_bytes(output),
                tunnels,
                "proxy throughput per second"
            );
        }
    }
}

/// Read with the handshake deadline applied.
async fn within_handshake<T>(future: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, future)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "client sent nothing usable in time"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::test_state;

    #[tokio::test(start_paused = true)]
    async fn rate_counters_read_zero_after_each_window() {
        let state = test_state();
        let shutdown = CancellationToken::new();
        let ticker = tokio::spawn(reset_rates(state.clone(), shutdown.clone()));

        state.proxy_stats.add_input(512);
        state.proxy_stats.add_output(2048);
        tokio::time::sleep(RATE_WINDOW / 2).await;
        assert_eq!(state.proxy_stats.input_bytes(), 512);
        assert_eq!(state.proxy_stats.output_bytes(), 2048);

        tokio::time::sleep(RATE_WINDOW / 2 + Duration::from_millis(1)).await;
        assert_eq!(state.proxy_stats.input_bytes(), 0);
        assert_eq!(state.proxy_stats.output_bytes(), 0);

        state.proxy_stats.add_input(7);
        tokio::time::sleep(RATE_WINDOW).await;
        assert_eq!(state.proxy_stats.input_bytes(), 0);

        shutdown.cancel();
        ticker.await.unwrap();
    }
}
