//! Statistics tracking for the DNS engine and the proxy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic statistics for the DNS interception engine.
pub struct DnsStats {
    pub requests: AtomicU64,
    pub redirected: AtomicU64,
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl DnsStats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            redirected: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_redirected(&self, response_time_ms: f64) {
        self.record(&self.redirected, response_time_ms);
    }

    pub fn record_forwarded(&self, response_time_ms: f64) {
        self.record(&self.forwarded, response_time_ms);
    }

    pub fn record_failed(&self, response_time_ms: f64) {
        self.record(&self.failed, response_time_ms);
    }

    fn record(&self, counter: &AtomicU64, response_time_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> DnsStatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let redirected = self.redirected.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        DnsStatsSnapshot {
            requests,
            redirected,
            forwarded,
            failed,
            avg_response_ms,
        }
    }
}

impl Default for DnsStats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DnsStatsSnapshot {
    pub requests: u64,
    pub redirected: u64,
    pub forwarded: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
}

/// Live proxy throughput.
///
/// The byte counters hold the bytes moved since the last [`reset_rates`]
/// call, which the router makes once per second, so they read as a rate.
/// A reader racing a reset may see a partial window.
///
/// [`reset_rates`]: ProxyStats::reset_rates
pub struct ProxyStats {
    active_tunnels: AtomicU64,
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            active_tunnels: AtomicU64::new(0),
            input_bytes: AtomicU64::new(0),
            output_bytes: AtomicU64::new(0),
        }
    }

    /// Bytes moved client to target.
    pub fn add_input(&self, bytes: u64) {
        self.input_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes moved target to client.
    pub fn add_output(&self, bytes: u64) {
        self.output_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn input_bytes(&self) -> u64 {
        self.input_bytes.load(Ordering::Relaxed)
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes.load(Ordering::Relaxed)
    }

    pub fn active_tunnels(&self) -> u64 {
        self.active_tunnels.load(Ordering::Relaxed)
    }

    /// Count a tunnel as active until the returned guard is dropped.
    pub fn open_tunnel(self: &Arc<Self>) -> TunnelGuard {
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
        TunnelGuard {
            stats: Arc::clone(self),
        }
    }

    /// Zero both byte counters, returning `(input, output)` for the window
    /// that just closed.
    pub fn reset_rates(&self) -> (u64, u64) {
        (
            self.input_bytes.swap(0, Ordering::Relaxed),
            self.output_bytes.swap(0, Ordering::Relaxed),
        )
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TunnelGuard {
    stats: Arc<ProxyStats>,
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.stats.active_tunnels.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Human readable byte count, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_snapshot_resets_counters() {
        let stats = DnsStats::new();
        stats.record_redirected(1.0);
        stats.record_forwarded(3.0);
        stats.record_failed(2.0);

        let snapshot = stats.snapshot_and_reset();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.redirected, 1);
        assert_eq!(snapshot.forwarded, 1);
        assert_eq!(snapshot.failed, 1);
        assert!((snapshot.avg_response_ms - 2.0).abs() < 1e-9);

        let snapshot = stats.snapshot_and_reset();
        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.avg_response_ms, 0.0);
    }

    #[test]
    fn proxy_rates_reset_to_zero() {
        let stats = ProxyStats::new();
        stats.add_input(100);
        stats.add_input(23);
        stats.add_output(7);

        assert_eq!(stats.input_bytes(), 123);
        assert_eq!(stats.output_bytes(), 7);
        assert_eq!(stats.reset_rates(), (123, 7));
        assert_eq!(stats.input_bytes(), 0);
        assert_eq!(stats.output_bytes(), 0);
    }

    #[test]
    fn tunnel_guard_tracks_active_tunnels() {
        let stats = Arc::new(ProxyStats::new());
        let first = stats.open_tunnel();
        let second = stats.open_tunnel();
        assert_eq!(stats.active_tunnels(), 2);

        drop(first);
        assert_eq!(stats.active_tunnels(), 1);
        drop(second);
        assert_eq!(stats.active_tunnels(), 0);
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
