//! Resolver configuration

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Cache tuning for a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum cached responses before inserts start forcing eviction.
    pub max_entries: usize,

    /// Floor applied to the lifetime of every cached entry.
    pub min_ttl: Duration,

    /// Cache no-answer responses, NXDOMAIN included.
    pub negative_cache: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            min_ttl: Duration::ZERO,
            negative_cache: true,
        }
    }
}

/// Options for a DNS over TLS resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DotOptions {
    /// Endpoint addresses overriding resolution of the server hostname.
    /// Entries are `ip` (server port applied) or `ip:port`.
    pub addresses: Vec<String>,

    /// Response caching; `None` disables the cache entirely.
    pub cache: Option<CacheOptions>,

    /// Per-lookup deadline used by the convenience API.
    pub timeout: Duration,

    /// TLS configuration override.
    #[serde(skip)]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            cache: None,
            timeout: Duration::from_secs(5),
            tls_config: None,
        }
    }
}

/// Options for a DNS over HTTPS resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DohOptions {
    /// Endpoint addresses overriding resolution of the URI host.
    /// Entries are `ip` (URI port applied) or `ip:port`.
    pub addresses: Vec<String>,

    /// Response caching; `None` disables the cache entirely.
    pub cache: Option<CacheOptions>,

    /// Per-lookup deadline used by the convenience API.
    pub timeout: Duration,

    /// TLS configuration override for the HTTPS connection.
    #[serde(skip)]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for DohOptions {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            cache: None,
            timeout: Duration::from_secs(5),
            tls_config: None,
        }
    }
}
