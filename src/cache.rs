//! Decision caches shared by the DNS engine and the router.
//!
//! Each cache does its own locking and evaluates expiry on read: an expired
//! entry found by a lookup is removed right there and reported as a miss.
//! `purge_expired` exists for an optional periodic sweep; nothing depends
//! on it running.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::filter::DomainClassification;

pub const CLASSIFICATION_TTL: Duration = Duration::from_secs(60);
pub const CONSENT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const SESSION_TTL: Duration = Duration::from_secs(6 * 60 * 60);

fn normalize(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

struct ClassificationEntry {
    classification: DomainClassification,
    expires_at: Instant,
}

/// Recently classified domains, keyed case-insensitively.
pub struct ClassificationCache {
    entries: RwLock<FxHashMap<String, ClassificationEntry>>,
    ttl: Duration,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::with_ttl(CLASSIFICATION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl,
        }
    }

    pub fn get(&self, domain: &str) -> Option<DomainClassification> {
        let key = normalize(domain);
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.get(&key) {
                Some(entry) if now < entry.expires_at => return Some(entry.classification),
                Some(_) => {}
                None => return None,
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        // Re-check under the write lock: a writer may have refreshed it.
        match entries.get(&key) {
            Some(entry) if now < entry.expires_at => Some(entry.classification),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, domain: &str, classification: DomainClassification) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        entries.insert(
            normalize(domain),
            ClassificationEntry {
                classification,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClassificationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-domain, per-client dismissals of a block warning.
///
/// Consent for one domain never bypasses the block for any other domain.
pub struct ConsentCache {
    entries: RwLock<FxHashMap<String, FxHashMap<IpAddr, Instant>>>,
    ttl: Duration,
}

impl ConsentCache {
    pub fn new() -> Self {
        Self::with_ttl(CONSENT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl,
        }
    }

    /// Record consent for `(domain, ip)`, restarting its TTL.
    pub fn add(&self, domain: &str, ip: IpAddr) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        entries
            .entry(normalize(domain))
            .or_default()
            .insert(ip, Instant::now() + self.ttl);
    }

    pub fn contains(&self, domain: &str, ip: IpAddr) -> bool {
        let key = normalize(domain);
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return false;
            };
            match entries.get(&key).and_then(|ips| ips.get(&ip)) {
                Some(&expires_at) if now < expires_at => return true,
                Some(_) => {}
                None => return false,
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        let Some(ips) = entries.get_mut(&key) else {
            return false;
        };
        match ips.get(&ip) {
            Some(&expires_at) if now < expires_at => true,
            Some(_) => {
                ips.remove(&ip);
                if ips.is_empty() {
                    entries.remove(&key);
                }
                false
            }
            None => false,
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let mut removed = 0;
        entries.retain(|_, ips| {
            let before = ips.len();
            ips.retain(|_, expires_at| now < *expires_at);
            removed += before - ips.len();
            !ips.is_empty()
        });
        removed
    }
}

impl Default for ConsentCache {
    fn default() -> Self {
        Self::new()
    }
}

struct Session {
    ips: FxHashSet<IpAddr>,
    expires_at: Instant,
}

/// Authenticated captive-portal sessions, keyed by username.
///
/// IP membership is a linear scan over live sessions, which is fine at
/// hotspot scale.
pub struct SessionCache {
    sessions: RwLock<FxHashMap<String, Session>>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(FxHashMap::default()),
            ttl,
        }
    }

    /// Create or replace the session for `username`, bound to `ip` only.
    pub fn set_login(&self, username: &str, ip: IpAddr) {
        let Ok(mut sessions) = self.sessions.write() else {
            return;
        };
        let mut ips = FxHashSet::default();
        ips.insert(ip);
        sessions.insert(
            username.to_lowercase(),
            Session {
                ips,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// True if any live session includes `ip`.
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let Ok(sessions) = self.sessions.read() else {
            return false;
        };
        sessions
            .values()
            .any(|session| now < session.expires_at && session.ips.contains(&ip))
    }

    /// True if `username` has a live session. An expired one is removed.
    pub fn contains_user(&self, username: &str) -> bool {
        let key = username.to_lowercase();
        let now = Instant::now();

        {
            let Ok(sessions) = self.sessions.read() else {
                return false;
            };
            match sessions.get(&key) {
                Some(session) if now < session.expires_at => return true,
                Some(_) => {}
                None => return false,
            }
        }

        let Ok(mut sessions) = self.sessions.write() else {
            return false;
        };
        match sessions.get(&key) {
            Some(session) if now < session.expires_at => true,
            Some(_) => {
                sessions.remove(&key);
                false
            }
            None => false,
        }
    }

    pub fn remove_login(&self, username: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&username.to_lowercase());
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut sessions) = self.sessions.write() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, session| now < session.expires_at);
        before - sessions.len()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The three decision caches, built once at startup and shared by reference.
#[derive(Default)]
pub struct DecisionCaches {
    pub classification: Arc<ClassificationCache>,
    pub consent: ConsentCache,
    pub sessions: SessionCache,
}

impl DecisionCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep all three caches. Returns the total number of entries removed.
    pub fn purge_expired(&self) -> usize {
        self.classification.purge_expired()
            + self.consent.purge_expired()
            + self.sessions.purge_expired()
    }
}
