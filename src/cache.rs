//! Wire-format DNS response cache
//!
//! Keys are query bytes with the transaction ID stripped; values are
//! response bytes likewise. The caller's ID is re-applied on lookup, so a
//! hit is byte-identical to a fresh response for the caller's query.

use crate::config::CacheOptions;
use crate::wire;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Entries inspected per insert while hunting for expired ones.
const EVICTION_PROBES: usize = 8;

/// Upper bound on the lifetime of a cached no-answer response.
const MAX_NEGATIVE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct CacheEntry {
    expires_at: Instant,
    body: Vec<u8>,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Message cache mapping ID-stripped queries to ID-stripped responses.
pub struct MessageCache {
    entries: RwLock<HashMap<Vec<u8>, CacheEntry>>,
    max_entries: usize,
    min_ttl: Duration,
    negative_cache: bool,
    stats: Arc<CacheStats>,
}

impl MessageCache {
    /// Create a new message cache
    pub fn new(options: CacheOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: options.max_entries,
            min_ttl: options.min_ttl,
            negative_cache: options.negative_cache,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Look up the cached response for a serialized query.
    ///
    /// Returns the response carrying the caller's transaction ID, or `None`
    /// for misses, expired entries, and inputs that are not queries.
    pub fn get(&self, request: &[u8]) -> Option<Vec<u8>> {
        if !wire::is_query(request) {
            return None;
        }
        let key = wire::strip_id(request)?;

        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.stats.hit();
                trace!("message cache hit");
                Some(wire::prepend_id([request[0], request[1]], &entry.body))
            }
            _ => {
                self.stats.miss();
                trace!("message cache miss");
                None
            }
        }
    }

    /// Insert a query/response pair.
    ///
    /// Invalid or unmatched pairs and uncacheable responses are ignored: the
    /// exchange already happened, the cache only decides whether to remember
    /// it.
    pub fn put(&self, request: &[u8], response: &[u8]) {
        if !wire::is_query(request) || !wire::is_response(response) {
            return;
        }
        if request[..2] != response[..2] {
            return;
        }

        let ttl = wire::min_ttl(response);
        if ttl <= 0 {
            return;
        }
        let mut lifetime = Duration::from_secs(ttl as u64);
        if wire::answer_count(response) == 0 {
            if !self.negative_cache {
                return;
            }
            lifetime = lifetime.min(MAX_NEGATIVE_TTL);
        }
        lifetime = lifetime.max(self.min_ttl);

        let mut entries = self.entries.write();
        self.evict(&mut entries);
        trace!(lifetime_secs = lifetime.as_secs(), "message cache insert");
        entries.insert(
            request[2..].to_vec(),
            CacheEntry {
                expires_at: Instant::now() + lifetime,
                body: response[2..].to_vec(),
            },
        );
    }

    /// Probe a handful of entries, dropping any that expired. When every
    /// probe is fresh and the table is full, the last probed entry is
    /// sacrificed so the insert cannot grow the table unbounded.
    fn evict(&self, entries: &mut HashMap<Vec<u8>, CacheEntry>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut tested = 0;
        let mut last_probed = None;
        for (key, entry) in entries.iter() {
            tested += 1;
            if entry.expires_at <= now {
                expired.push(key.clone());
            }
            last_probed = Some(key.clone());
            if tested >= EVICTION_PROBES {
                break;
            }
        }

        let evicted = expired.len();
        for key in expired {
            entries.remove(&key);
            self.stats.eviction();
        }
        if evicted == 0 && tested >= EVICTION_PROBES && entries.len() >= self.max_entries {
            if let Some(key) = last_probed {
                entries.remove(&key);
                self.stats.eviction();
            }
        }
    }

    /// Number of live entries, expired ones included until they age out.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clear all cached responses
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    #[cfg(test)]
    pub(crate) fn lifetime_of(&self, request: &[u8]) -> Option<Duration> {
        let entries = self.entries.read();
        let entry = entries.get(&request[2..])?;
        Some(entry.expires_at.saturating_duration_since(Instant::now()))
    }

    #[cfg(test)]
    pub(crate) fn expire_all(&self) {
        let mut entries = self.entries.write();
        let past = Instant::now() - Duration::from_secs(1);
        for entry in entries.values_mut() {
            entry.expires_at = past;
        }
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}
