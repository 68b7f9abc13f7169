//! DNS query decision logic.
//!
//! Decides what the DNS engine does with each query:
//! 1. Connectivity probes from clients without a session go to the portal
//! 2. Portal and panel names always resolve to the gateway
//! 3. Blocked categories resolve to the gateway (so the block page is served)
//!    unless this client consented for this domain
//! 4. Proxy-allowed names resolve to the gateway so the router carries them
//! 5. Everything else is forwarded upstream
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::net::IpAddr;
use std::sync::Arc;

use crate::dns::DnsQuery;
use crate::filter::{DomainClassification, is_connectivity_probe};
use crate::gateway::GatewayState;

/// TTL for redirects that stand in for a block or a missing session, so the
/// client re-asks as soon as consent or login changes the answer.
pub const BLOCK_REDIRECT_TTL: u32 = 1;
/// TTL for redirects to the gateway's own services and proxied names.
pub const SERVICE_REDIRECT_TTL: u32 = 30;

/// Why a query was answered with the gateway's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    ConnectivityProbe,
    Portal,
    Blocked(DomainClassification),
    Proxy,
}

impl RedirectReason {
    pub fn ttl(self) -> u32 {
        match self {
            Self::ConnectivityProbe | Self::Blocked(_) => BLOCK_REDIRECT_TTL,
            Self::Portal | Self::Proxy => SERVICE_REDIRECT_TTL,
        }
    }
}

/// Action to take for a DNS query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAction {
    /// Answer with the gateway's own address.
    Redirect(RedirectReason),
    /// Relay the query to the upstream resolver untouched.
    Forward,
}

/// Resolver handles DNS query processing decisions.
///
/// Reads the same classification, consent and session caches the router
/// reads, so both layers reach the same verdict for a client.
pub struct Resolver {
    state: Arc<GatewayState>,
}

impl Resolver {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    /// Decide what to do with `query` sent by `client`.
    pub fn process_query(&self, query: &DnsQuery, client: IpAddr) -> QueryAction {
        let config = &self.state.config;
        let caches = &self.state.caches;
        let domain = query.domain.as_str();
        let classification = self.state.classifier.classify(domain);

        if is_connectivity_probe(domain) && !caches.sessions.contains_ip(client) {
            return QueryAction::Redirect(RedirectReason::ConnectivityProbe);
        }

        if config.is_portal_domain(domain) {
            return QueryAction::Redirect(RedirectReason::Portal);
        }

        if classification.is_blocked()
            && query.qtype.is_address()
            && !caches.consent.contains(domain, client)
        {
            return QueryAction::Redirect(RedirectReason::Blocked(classification));
        }

        if classification == DomainClassification::ProxyAllowed {
            return QueryAction::Redirect(RedirectReason::Proxy);
        }

        QueryAction::Forward
    }
}
