//! Round-trip interface and endpoint rotation shared by the transports

use crate::cache::MessageCache;
use crate::error::{DnsError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

/// One DNS exchange: a serialized query in, a serialized response out.
///
/// Implementations own the back-end (TLS stream, HTTPS request, cache
/// front) and bound every blocking step by `deadline`.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(&self, deadline: Option<Instant>, request: &[u8]) -> Result<Vec<u8>>;
}

/// Ordered resolver endpoints with a rotating active index.
///
/// A failed dial advances the index by one through a compare-and-swap
/// keyed on the index the dialer saw, so a burst of concurrent failures
/// rotates at most one position collectively.
pub struct Endpoints {
    addrs: Vec<SocketAddr>,
    index: AtomicUsize,
}

impl Endpoints {
    /// Create an endpoint set; the list must be non-empty.
    pub fn new(addrs: Vec<SocketAddr>) -> Result<Self> {
        if addrs.is_empty() {
            return Err(DnsError::Config("no resolver endpoints".to_string()));
        }
        Ok(Self {
            addrs,
            index: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// The active endpoint and the slot it was read from.
    pub fn current(&self) -> (usize, SocketAddr) {
        let slot = self.index.load(Ordering::Acquire);
        (slot, self.addrs[slot])
    }

    /// Advance past `seen`, but only if no other failure got there first.
    pub fn advance_from(&self, seen: usize) -> bool {
        let next = (seen + 1) % self.addrs.len();
        self.index
            .compare_exchange(seen, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// Cache-fronted decorator around another round-tripper.
///
/// Lookups hit the cache first; responses that came off the network are
/// written back. An entry inserted before a cancellation stays valid.
pub struct CachedTransport {
    inner: Arc<dyn RoundTrip>,
    cache: Arc<MessageCache>,
}

impl CachedTransport {
    pub fn new(inner: Arc<dyn RoundTrip>, cache: Arc<MessageCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }
}

#[async_trait]
impl RoundTrip for CachedTransport {
    async fn round_trip(&self, deadline: Option<Instant>, request: &[u8]) -> Result<Vec<u8>> {
        if let Some(response) = self.cache.get(request) {
            trace!("serving response from cache");
            return Ok(response);
        }
        let response = self.inner.round_trip(deadline, request).await?;
        self.cache.put(request, &response);
        Ok(response)
    }
}

/// Run `fut` to completion, bounded by `deadline` when one is set.
pub(crate) async fn with_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| DnsError::Timeout),
        None => Ok(fut.await),
    }
}
