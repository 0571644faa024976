//! Precognitive cache
//!
//! Bounded LRU of speculatively fetched responses, keyed by URL. Fed by
//! fire-and-forget hints; consulted before rules and chaos so a prefetched
//! resource is never delayed or faulted.

use crate::types::{NetworkResponse, ResponseSource};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedEntry {
    response: NetworkResponse,
    stored_at: Instant,
}

/// Hint-driven prefetch cache
#[derive(Debug)]
pub struct PrecognitiveCache {
    entries: LruCache<String, CachedEntry>,
    ttl: Option<Duration>,
    in_flight: HashSet<String>,
}

impl PrecognitiveCache {
    /// Create cache holding at most `capacity` entries (minimum one)
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            in_flight: HashSet::new(),
        }
    }

    /// Whether a hint for `url` should start a prefetch
    ///
    /// Marks the URL in flight when it returns true; the caller must
    /// report back through [`complete`](Self::complete).
    pub fn should_prefetch(&mut self, url: &str) -> bool {
        if self.in_flight.contains(url) {
            return false;
        }
        if let Some(entry) = self.entries.peek(url) {
            if !self.is_expired(entry) {
                return false;
            }
        }
        self.in_flight.insert(url.to_string());
        true
    }

    /// Record the outcome of a prefetch
    ///
    /// Only successful responses are cached. Returns whether an entry was stored.
    pub fn complete(&mut self, url: &str, response: Option<NetworkResponse>) -> bool {
        self.in_flight.remove(url);
        match response {
            Some(response) if response.is_success() => {
                let evicted = self.entries.push(
                    url.to_string(),
                    CachedEntry {
                        response,
                        stored_at: Instant::now(),
                    },
                );
                if let Some((old, _)) = evicted.filter(|(key, _)| key != url) {
                    tracing::debug!(url = %old, "evicted precognitive entry");
                }
                true
            }
            _ => false,
        }
    }

    /// Take a fresh cached response for `url`
    ///
    /// Stale entries are dropped. The entry stays cached and becomes most
    /// recently used.
    pub fn take_hit(&mut self, url: &str) -> Option<NetworkResponse> {
        let expired = self.entries.peek(url).map(|e| self.is_expired(e))?;
        if expired {
            self.entries.pop(url);
            return None;
        }
        self.entries
            .get(url)
            .map(|e| e.response.clone().with_source(ResponseSource::Precognition))
    }

    /// Drop every entry past its TTL
    ///
    /// Returns the number of entries removed.
    pub fn prune_expired(&mut self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= ttl)
            .map(|(url, _)| url.clone())
            .collect();
        for url in &expired {
            self.entries.pop(url);
        }
        expired.len()
    }

    /// Cached URL without touching recency
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains(url)
    }

    /// Cached entry count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Prefetches awaiting completion
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drop all entries and pending marks
    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }

    fn is_expired(&self, entry: &CachedEntry) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(cache: &mut PrecognitiveCache, url: &str) {
        assert!(cache.should_prefetch(url));
        assert!(cache.complete(url, Some(NetworkResponse::ok(format!("body:{url}")))));
    }

    #[test]
    fn hit_marks_precognition_source() {
        let mut cache = PrecognitiveCache::new(4, None);
        fill(&mut cache, "/a");

        let hit = cache.take_hit("/a").unwrap();
        assert_eq!(hit.source, ResponseSource::Precognition);
        assert_eq!(hit.body, "body:/a");
        assert!(cache.take_hit("/b").is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = PrecognitiveCache::new(2, None);
        fill(&mut cache, "/a");
        fill(&mut cache, "/b");
        cache.take_hit("/a");
        fill(&mut cache, "/c");

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("/a"));
        assert!(!cache.contains("/b"));
        assert!(cache.contains("/c"));
    }

    #[test]
    fn duplicate_hints_dedup() {
        let mut cache = PrecognitiveCache::new(4, None);
        assert!(cache.should_prefetch("/a"));
        assert!(!cache.should_prefetch("/a"));
        assert_eq!(cache.in_flight(), 1);

        cache.complete("/a", Some(NetworkResponse::ok("x")));
        assert!(!cache.should_prefetch("/a"));
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn failed_prefetch_not_cached() {
        let mut cache = PrecognitiveCache::new(4, None);
        assert!(cache.should_prefetch("/a"));
        assert!(!cache.complete("/a", Some(NetworkResponse::network(404, ""))));
        assert!(cache.should_prefetch("/a"));
        assert!(!cache.complete("/a", None));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let cache = PrecognitiveCache::new(0, None);
        assert_eq!(cache.capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_expire() {
        let mut cache = PrecognitiveCache::new(4, Some(Duration::from_secs(5)));
        fill(&mut cache, "/a");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.take_hit("/a").is_some());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.take_hit("/a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_only_stale_entries() {
        let mut cache = PrecognitiveCache::new(4, Some(Duration::from_secs(5)));
        fill(&mut cache, "/old");
        tokio::time::advance(Duration::from_secs(3)).await;
        fill(&mut cache, "/new");
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.prune_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("/new"));
        assert!(!cache.contains("/old"));
    }

    #[test]
    fn prune_without_ttl_keeps_everything() {
        let mut cache = PrecognitiveCache::new(4, None);
        fill(&mut cache, "/a");
        assert_eq!(cache.prune_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_can_be_refetched() {
        let mut cache = PrecognitiveCache::new(4, Some(Duration::from_secs(1)));
        fill(&mut cache, "/a");
        assert!(!cache.should_prefetch("/a"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.should_prefetch("/a"));
    }
}
