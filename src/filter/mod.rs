//! Domain classification.
//!
//! Both interception engines classify through [`Classifier`], which puts the
//! shared [`ClassificationCache`] in front of the policy list so that a DNS
//! decision and a TCP decision for the same domain see the same answer.

mod policy;
pub mod wildcard;

use std::fmt;
use std::sync::Arc;

pub use policy::{POLICY_FILES, PolicyList, PolicySource};

use crate::cache::ClassificationCache;

/// Hostnames operating systems and browsers fetch to detect a captive portal.
pub const CONNECTIVITY_PROBE_DOMAINS: [&str; 22] = [
    "connectivitycheck.gstatic.com",
    "clients1.google.com",
    "clients2.google.com",
    "clients3.google.com",
    "clients4.google.com",
    "clients5.google.com",
    "connectivitycheck.android.com",
    "captive.apple.com",
    "www.apple.com",
    "www.msftconnecttest.com",
    "msftconnecttest.com",
    "msftncsi.com",
    "ipv6.msftconnecttest.com",
    "ipv6.msftncsi.com",
    "detectportal.firefox.com",
    "connectivity-check.ubuntu.com",
    "network-test.debian.org",
    "start.ubuntu.com",
    "neverssl.com",
    "kindle-wifi.amazon.com",
    "a.rvd.nokia.com",
    "walledgarden.com",
];

pub fn is_connectivity_probe(domain: &str) -> bool {
    CONNECTIVITY_PROBE_DOMAINS
        .iter()
        .any(|probe| probe.eq_ignore_ascii_case(domain))
}

/// Policy category assigned to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainClassification {
    Nsfw,
    Ads,
    Scam,
    ProxyAllowed,
    /// No pattern in the policy list matched.
    Unlisted,
}

impl DomainClassification {
    /// NSFW, ads and scam domains are blocked unless the client consented.
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Nsfw | Self::Ads | Self::Scam)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nsfw => "NSFW",
            Self::Ads => "ADS",
            Self::Scam => "SCAM",
            Self::ProxyAllowed => "PROXY",
            Self::Unlisted => "NONE",
        }
    }
}

impl fmt::Display for DomainClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache-first classifier shared by the DNS engine and the router.
#[derive(Clone)]
pub struct Classifier {
    policy: Arc<dyn PolicySource>,
    cache: Arc<ClassificationCache>,
}

impl Classifier {
    pub fn new(policy: Arc<dyn PolicySource>, cache: Arc<ClassificationCache>) -> Self {
        Self { policy, cache }
    }

    /// Classify `domain`, scanning the policy list only on a cache miss.
    /// Every scan result is cached, including [`DomainClassification::Unlisted`].
    pub fn classify(&self, domain: &str) -> DomainClassification {
        if let Some(hit) = self.cache.get(domain) {
            return hit;
        }

        let classification = self
            .policy
            .classify(domain)
            .unwrap_or(DomainClassification::Unlisted);
        self.cache.set(domain, classification);
        classification
    }

    pub fn cache(&self) -> &ClassificationCache {
        &self.cache
    }
}
