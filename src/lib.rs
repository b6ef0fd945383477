//! veildns - stub DNS resolver with encrypted transports
//!
//! Features:
//! - DNS over TLS (RFC 7858) and DNS over HTTPS (RFC 8484) transports
//! - Wire-format response caching with TTL awareness and negative caching
//! - Multi-endpoint failover with atomic index rotation
//! - Opportunistic TLS upgrade of plaintext port-53 dials
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                      StubResolver                           |
//! |              lookup_ip / exchange / connect                 |
//! |                          |                                  |
//! |                     +----v----+                             |
//! |                     | DnsConn |  write / read / close /     |
//! |                     +----+----+  set_deadline               |
//! |                          |                                  |
//! |                 +--------v--------+      +--------------+   |
//! |                 | CachedTransport +------> MessageCache |   |
//! |                 +--------+--------+      +--------------+   |
//! |               +----------+----------+                       |
//! |          +----v----+          +-----v------+                |
//! |          |   DoT   |          |    DoH     |                |
//! |          +----+----+          +-----+------+                |
//! |               +-----Endpoints------+                        |
//! +-------------------------------------------------------------+
//! ```
//!
//! The cache keys by query bytes with the transaction ID stripped, so two
//! hosts asking the same question share an answer regardless of their IDs.
//! A failed endpoint dial rotates the shared index by one; TLS policy
//! failures do not.

pub mod cache;
pub mod config;
pub mod conn;
pub mod doh;
pub mod dot;
pub mod error;
pub mod opportunistic;
pub mod resolver;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod tests;

pub use cache::MessageCache;
pub use config::{CacheOptions, DohOptions, DotOptions};
pub use conn::{DnsConn, Framing};
pub use doh::HttpsTransport;
pub use dot::TlsTransport;
pub use error::{DnsError, Result};
pub use opportunistic::OpportunisticDialer;
pub use resolver::StubResolver;
pub use transport::{CachedTransport, Endpoints, RoundTrip};
