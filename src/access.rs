//! Client address allow list.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::{GatewayError, Result};

/// CIDR ranges allowed to use the gateway. An empty list allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    networks: Vec<IpNetwork>,
}

impl AllowList {
    /// Parse a comma separated list such as `10.0.0.0/8,fd00::/8`. A bare
    /// address is taken as a single-host range.
    pub fn parse(list: &str) -> Result<Self> {
        let networks = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<IpNetwork>()
                    .map_err(|e| GatewayError::InvalidConfig(format!("allowed IP range {entry:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { networks })
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        let ip = canonical(ip);
        self.networks.iter().any(|network| network.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Treat IPv4-mapped IPv6 peers (dual-stack sockets) as plain IPv4.
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}
