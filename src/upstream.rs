//! Upstream DNS client.
//!
//! Two jobs: relaying queries the gateway does not answer itself, and
//! resolving proxy targets. Resolutions are cached per (name, record type)
//! for the smallest TTL in the answer.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::dns::{self, HEADER_LEN, MAX_DNS_PACKET_SIZE, QueryType};

/// How long to wait for the upstream resolver before giving up.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(1900);

/// TTL used when an answer carries no usable records.
const DEFAULT_ANSWER_TTL: Duration = Duration::from_secs(300);

struct CachedAnswer {
    addresses: Vec<IpAddr>,
    expires_at: Instant,
}

pub struct UpstreamClient {
    server: SocketAddr,
    timeout: Duration,
    answers: RwLock<FxHashMap<(String, u16), CachedAnswer>>,
}

impl UpstreamClient {
    pub fn new(server: SocketAddr) -> Self {
        Self::with_timeout(server, UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(server: SocketAddr, timeout: Duration) -> Self {
        Self {
            server,
            timeout,
            answers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send `query` upstream and return the raw response with the same
    /// transaction id. No retry: a timeout or socket error is returned as is.
    pub async fn forward(&self, query: &[u8]) -> io::Result<Vec<u8>> {
        if query.len() < HEADER_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "query shorter than DNS header"));
        }
        let id = [query[0], query[1]];

        let socket = self.connect().await?;
        socket.send(query).await?;

        let exchange = async {
            let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
            loop {
                let len = socket.recv(&mut buf).await?;
                // Stray or late datagrams for another id are dropped.
                if len >= HEADER_LEN && buf[..2] == id {
                    buf.truncate(len);
                    return Ok::<_, io::Error>(buf);
                }
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream DNS timed out"))?
    }

    /// Resolve the IPv4 addresses of `domain`.
    pub async fn resolve_a(&self, domain: &str) -> io::Result<Vec<IpAddr>> {
        self.resolve(domain, QueryType::A).await
    }

    /// Resolve the IPv6 addresses of `domain`.
    pub async fn resolve_aaaa(&self, domain: &str) -> io::Result<Vec<IpAddr>> {
        self.resolve(domain, QueryType::Aaaa).await
    }

    async fn resolve(&self, domain: &str, qtype: QueryType) -> io::Result<Vec<IpAddr>> {
        let key = (domain.to_ascii_lowercase(), qtype.to_u16());

        if let Some(addresses) = self.cached(&key) {
            return Ok(addresses);
        }

        let query = dns::build_query(rand::random(), &key.0, qtype);
        let response = self.forward(&query).await?;
        let answers = dns::parse_address_answers(&response, qtype)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed DNS response"))?;

        if !answers.addresses.is_empty() {
            let ttl = answers
                .min_ttl
                .map_or(DEFAULT_ANSWER_TTL, |ttl| Duration::from_secs(u64::from(ttl)));
            debug!(domain = %key.0, ?qtype, ttl = ttl.as_secs(), "cached upstream answer");
            if let Ok(mut cache) = self.answers.write() {
                cache.insert(
                    key,
                    CachedAnswer {
                        addresses: answers.addresses.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
        }

        Ok(answers.addresses)
    }

    fn cached(&self, key: &(String, u16)) -> Option<Vec<IpAddr>> {
        let now = Instant::now();
        {
            let cache = self.answers.read().ok()?;
            match cache.get(key) {
                Some(entry) if now < entry.expires_at => return Some(entry.addresses.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        if let Ok(mut cache) = self.answers.write() {
            if cache.get(key).is_some_and(|entry| now >= entry.expires_at) {
                cache.remove(key);
            }
        }
        None
    }

    /// Drop expired resolutions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut cache) = self.answers.write() else {
            return 0;
        };
        let before = cache.len();
        cache.retain(|_, entry| now < entry.expires_at);
        before - cache.len()
    }

    async fn connect(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = match self.server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.server).await?;
        Ok(socket)
    }
}
