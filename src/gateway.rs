//! Gateway orchestration.
//!
//! Builds the shared state once, binds the DNS engine and both router
//! listeners, and runs them until the shutdown token fires.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::AllowList;
use crate::cache::DecisionCaches;
use crate::error::{GatewayError, Result};
use crate::filter::{Classifier, DomainClassification, PolicyList, PolicySource};
use crate::router::Router;
use crate::stats::{DnsStats, ProxyStats};
use crate::transport::udp::DnsEngine;
use crate::upstream::UpstreamClient;
use crate::web::{BlockPage, PanelApp, PortalApp, UserDirectory};

/// Interval between DNS counter reports.
const DNS_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Validated gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub forward_dns: SocketAddr,
    pub allowed_ips: AllowList,
    pub captive_portal: bool,
    pub portal_domain: String,
    pub panel_domain: String,
    pub admin_username: String,
    pub admin_password: String,
    pub dns_bind: SocketAddr,
    pub router_ipv4: Ipv4Addr,
    pub router_ipv6: Ipv6Addr,
    pub http_bind: SocketAddr,
    pub https_bind: SocketAddr,
    /// Destination ports for proxied HTTP and HTTPS connections.
    pub http_target_port: u16,
    pub https_target_port: u16,
    pub policy_dir: PathBuf,
    /// Hotspot users created at startup, as `(username, password)`.
    pub users: Vec<(String, String)>,
    /// Period of the cache expiry sweep; `None` leaves expiry to reads.
    pub sweep_interval: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            forward_dns: SocketAddr::from(([8, 8, 8, 8], 53)),
            allowed_ips: AllowList::default(),
            captive_portal: true,
            portal_domain: "cnet.portal".to_string(),
            panel_domain: "cnet.panel".to_string(),
            admin_username: "admin".to_string(),
            admin_password: String::new(),
            dns_bind: SocketAddr::from(([127, 0, 0, 1], 53)),
            router_ipv4: Ipv4Addr::new(127, 0, 0, 2),
            router_ipv6: Ipv6Addr::UNSPECIFIED,
            http_bind: SocketAddr::from(([127, 0, 0, 2], 80)),
            https_bind: SocketAddr::from(([127, 0, 0, 2], 443)),
            http_target_port: 80,
            https_target_port: 443,
            policy_dir: PathBuf::from("data"),
            users: Vec::new(),
            sweep_interval: None,
        }
    }
}

impl GatewayConfig {
    /// True for the captive-portal login domain and the management panel domain.
    pub fn is_portal_domain(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.');
        domain.eq_ignore_ascii_case(&self.portal_domain) || domain.eq_ignore_ascii_case(&self.panel_domain)
    }

    pub fn validate(&self) -> Result<()> {
        if self.portal_domain.is_empty() || self.panel_domain.is_empty() {
            return Err(GatewayError::InvalidConfig("portal and panel domains must be set".into()));
        }
        if self.portal_domain.eq_ignore_ascii_case(&self.panel_domain) {
            return Err(GatewayError::InvalidConfig(format!(
                "portal and panel domains must differ (both {:?})",
                self.portal_domain
            )));
        }
        if self.admin_username.is_empty() || self.admin_password.is_empty() {
            return Err(GatewayError::InvalidConfig("admin credentials must not be empty".into()));
        }
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(GatewayError::InvalidConfig("sweep interval must be positive".into()));
        }
        Ok(())
    }
}

/// State shared by the DNS engine, the router and the web apps.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub classifier: Classifier,
    pub caches: Arc<DecisionCaches>,
    pub upstream: Arc<UpstreamClient>,
    pub users: Arc<UserDirectory>,
    pub dns_stats: DnsStats,
    pub proxy_stats: Arc<ProxyStats>,
    portal: PortalApp,
    panel: PanelApp,
    block_pages: [BlockPage; 3],
}

impl GatewayState {
    pub fn new(config: GatewayConfig, policy: Arc<dyn PolicySource>) -> Self {
        let caches = Arc::new(DecisionCaches::new());
        let users = Arc::new(UserDirectory::new());
        for (username, password) in &config.users {
            if let Err(e) = users.add(username, password) {
                warn!(user = %username, "skipping seed user: {e}");
            }
        }

        Self {
            classifier: Classifier::new(policy, caches.classification.clone()),
            upstream: Arc::new(UpstreamClient::new(config.forward_dns)),
            portal: PortalApp::new(users.clone(), caches.clone()),
            panel: PanelApp::new(&config.admin_username, &config.admin_password, users.clone(), caches.clone()),
            block_pages: [
                BlockPage::new(DomainClassification::Nsfw, caches.clone()),
                BlockPage::new(DomainClassification::Ads, caches.clone()),
                BlockPage::new(DomainClassification::Scam, caches.clone()),
            ],
            dns_stats: DnsStats::new(),
            proxy_stats: Arc::new(ProxyStats::new()),
            users,
            caches,
            config,
        }
    }

    pub fn portal(&self) -> &PortalApp {
        &self.portal
    }

    pub fn panel(&self) -> &PanelApp {
        &self.panel
    }

    /// The block page for a blocked category.
    pub fn block_page(&self, classification: DomainClassification) -> Option<&BlockPage> {
        self.block_pages.iter().find(|page| page.category() == classification)
    }

    /// True when captive-portal gating applies and `ip` has no session.
    pub fn needs_login(&self, ip: IpAddr) -> bool {
        self.config.captive_portal && !self.caches.sessions.contains_ip(ip)
    }

    /// Sweep every cache, returning how many entries were dropped.
    pub fn purge_expired(&self) -> usize {
        self.caches.purge_expired() + self.upstream.purge_expired()
    }
}

/// A gateway with all listeners bound.
pub struct Gateway {
    state: Arc<GatewayState>,
    dns: DnsEngine,
    router: Router,
}

impl Gateway {
    /// Load the policy files from `config.policy_dir` and bind.
    pub async fn bind(config: GatewayConfig) -> Result<Self> {
        let policy = PolicyList::load_dir(&config.policy_dir)?;
        info!(patterns = policy.len(), dir = %config.policy_dir.display(), "policy loaded");
        Self::with_policy(config, Arc::new(policy)).await
    }

    /// Bind every listener. Any bind failure aborts startup.
    pub async fn with_policy(config: GatewayConfig, policy: Arc<dyn PolicySource>) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(GatewayState::new(config, policy));
        let config = &state.config;

        let dns = DnsEngine::bind(config.dns_bind, state.clone())
            .await
            .map_err(|source| GatewayError::Bind {
                addr: config.dns_bind,
                source,
            })?;
        let router = Router::bind(state.clone()).await?;

        Ok(Self { state, dns, router })
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    pub fn dns_addr(&self) -> SocketAddr {
        self.dns.local_addr()
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.router.http_addr()
    }

    pub fn https_addr(&self) -> SocketAddr {
        self.router.https_addr()
    }

    /// Serve until `shutdown` is cancelled. Handlers already running are
    /// left to finish on their own.
    pub async fn run(self, shutdown: CancellationToken) {
        let config = &self.state.config;
        info!(
            dns = %self.dns_addr(),
            http = %self.http_addr(),
            https = %self.https_addr(),
            upstream = %config.forward_dns,
            captive_portal = config.captive_portal,
            "gateway listening"
        );

        tokio::join!(
            self.dns.run(shutdown.clone()),
            self.router.run(shutdown.clone()),
            report_dns_stats(self.state.clone(), shutdown.clone()),
            sweep(self.state.clone(), shutdown),
        );
        info!("gateway stopped");
    }
}

/// Bind with the configured policy directory and serve until shutdown.
pub async fn run(config: GatewayConfig, shutdown: CancellationToken) -> Result<()> {
    Gateway::bind(config).await?.run(shutdown).await;
    Ok(())
}

async fn report_dns_stats(state: Arc<GatewayState>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(DNS_STATS_INTERVAL);
    interval.tick().await; // Skip first immediate tick
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let stats = state.dns_stats.snapshot_and_reset();
        info!(
            requests = stats.requests,
            redirected = stats.redirected,
            forwarded = stats.forwarded,
            failed = stats.failed,
            avg_response_ms = format_args!("{:.2}", stats.avg_response_ms),
            classifications = state.caches.classification.len(),
            users = state.users.len(),
            "dns stats"
        );
    }
}

async fn sweep(state: Arc<GatewayState>, shutdown: CancellationToken) {
    let Some(period) = state.config.sweep_interval else {
        return;
    };
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let removed = state.purge_expired();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
    }
}
