//! Edgeguard - DNS interception and transparent proxying for hotspot gateways.
//!
//! The DNS engine answers policy-matched names with the gateway's own
//! address; the router then sees those connections and blocks, serves the
//! captive portal, or tunnels them by `Host` header or SNI. Both engines
//! read the same [`cache::DecisionCaches`], so they agree per client.

pub mod access;
pub mod cache;
pub mod dns;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod resolver;
pub mod router;
pub mod stats;
pub mod tls;
pub mod transport;
pub mod upstream;
pub mod web;

pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayConfig, GatewayState};
