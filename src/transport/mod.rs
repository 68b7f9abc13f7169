//! DNS transport.
//!
//! The UDP engine receives queries from clients, asks the resolver what to
//! do, and answers. Per-query outcome lines go through [`QueryLogger`].

pub mod udp;

use std::net::SocketAddr;

use tracing::debug;

use crate::resolver::RedirectReason;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy)]
pub enum Protocol {
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
        }
    }
}

/// Logger for DNS query events.
pub struct QueryLogger {
    protocol: Protocol,
}

impl QueryLogger {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn redirected(&self, domain: &str, reason: RedirectReason, from: SocketAddr, elapsed_ms: f64) {
        debug!(
            protocol = self.protocol.as_str(),
            domain,
            ?reason,
            client = %from,
            total_ms = format_args!("{elapsed_ms:.3}"),
            "REDIRECTED"
        );
    }

    pub fn forwarded(&self, domain: &str, from: SocketAddr, total_ms: f64, upstream_ms: f64) {
        debug!(
            protocol = self.protocol.as_str(),
            domain,
            client = %from,
            total_ms = format_args!("{total_ms:.3}"),
            upstream_ms = format_args!("{upstream_ms:.3}"),
            "FORWARDED"
        );
    }

    pub fn failed(&self, domain: Option<&str>, from: SocketAddr, error: &dyn std::fmt::Display) {
        debug!(
            protocol = self.protocol.as_str(),
            domain = domain.unwrap_or("-"),
            client = %from,
            %error,
            "FAILED"
        );
    }
}
