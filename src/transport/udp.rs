//! UDP DNS interception engine.
//!
//! One receive loop reads datagrams and spawns a task per datagram, so a
//! slow upstream forward never holds up the next query. Every datagram from
//! an allowed client gets exactly one reply, error paths included.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Protocol, QueryLogger};
use crate::access;
use crate::dns::{self, DnsQuery, MAX_DNS_PACKET_SIZE};
use crate::gateway::GatewayState;
use crate::resolver::{QueryAction, Resolver};

pub struct DnsEngine {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    handler: Arc<Handler>,
}

struct Handler {
    state: Arc<GatewayState>,
    resolver: Resolver,
    logger: QueryLogger,
}

impl DnsEngine {
    pub async fn bind(addr: SocketAddr, state: Arc<GatewayState>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            handler: Arc::new(Handler {
                resolver: Resolver::new(state.clone()),
                logger: QueryLogger::new(Protocol::Udp),
                state,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive until `shutdown` fires. In-flight datagrams finish on their own.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("UDP recv error: {e}");
                        continue;
                    }
                },
            };

            let client_ip = access::canonical(src.ip());
            if !self.handler.state.config.allowed_ips.allows(client_ip) {
                debug!(client = %src, "dropping query from disallowed address");
                continue;
            }

            let datagram = buf[..len].to_vec();
            let socket = self.socket.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let response = handler.answer(&datagram, src, client_ip).await;
                if let Err(e) = socket.send_to(&response, src).await {
                    debug!(client = %src, "UDP response error: {e}");
                }
            });
        }

        debug!(addr = %self.local_addr, "DNS engine stopped");
    }
}

impl Handler {
    async fn answer(&self, datagram: &[u8], src: SocketAddr, client_ip: IpAddr) -> Vec<u8> {
        let start_time = Instant::now();
        let stats = &self.state.dns_stats;

        let Some(query) = DnsQuery::parse(datagram) else {
            self.logger.failed(None, src, &"malformed query");
            stats.record_failed(elapsed_ms(start_time));
            return dns::error_response(datagram);
        };

        match self.resolver.process_query(&query, client_ip) {
            QueryAction::Redirect(reason) => {
                let config = &self.state.config;
                let response = query.redirect_response(datagram, config.router_ipv4, config.router_ipv6, reason.ttl());
                let elapsed = elapsed_ms(start_time);
                self.logger.redirected(&query.domain, reason, src, elapsed);
                stats.record_redirected(elapsed);
                response
            }
            QueryAction::Forward => {
                let upstream_start = Instant::now();
                match self.state.upstream.forward(datagram).await {
                    Ok(response) => {
                        let total = elapsed_ms(start_time);
                        self.logger.forwarded(&query.domain, src, total, elapsed_ms(upstream_start));
                        stats.record_forwarded(total);
                        response
                    }
                    Err(e) => {
                        self.logger.failed(Some(&query.domain), src, &e);
                        stats.record_failed(elapsed_ms(start_time));
                        dns::error_response(datagram)
                    }
                }
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
