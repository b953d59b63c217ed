// Local cache store for reservation reads
// Namespaced keys, one fixed TTL, lazy eviction of stale entries on access

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

pub const DETAIL_PREFIX: &str = "detail:";
pub const LIST_PREFIX: &str = "list:";
pub const RATES_PREFIX: &str = "rates:";

pub fn detail_key(reservation_id: &str) -> String {
    format!("{}{}", DETAIL_PREFIX, reservation_id)
}

pub fn list_key(filter_hash: &str) -> String {
    format!("{}{}", LIST_PREFIX, filter_hash)
}

pub fn rates_key(filter_hash: &str) -> String {
    format!("{}{}", RATES_PREFIX, filter_hash)
}

// Stable hash of filter fields. Pairs are sorted first, so the same filters
// hash identically whatever order the caller supplied them in.
pub fn filter_hash<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let canonical: BTreeMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();

    let mut hasher = Sha256::new();
    for (key, value) in &canonical {
        // Length prefixes keep ("ab","c") and ("a","bc") apart
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub expired_count: AtomicUsize,
    pub invalidation_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub invalidation_count: usize,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub captured_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            captured_at: Instant::now(),
        }
    }

    // Fresh strictly while now - captured_at < ttl
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() >= ttl
    }
}

pub struct CacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        // The shard guard must be released before remove_if below
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.stats.hit_count.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                return None;
            }
        };

        let ttl = self.ttl;
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(ttl))
            .is_some()
        {
            self.stats.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.miss_count.fetch_add(1, Ordering::Relaxed);
        debug!(key, "cache entry stale");
        None
    }

    // Fresh value without touching stats or evicting
    pub fn peek(&self, key: &str) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.value.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), CacheEntry::new(value));
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.invalidation_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_where(|key, _| key.starts_with(prefix))
    }

    // Removes every entry the predicate selects; returns how many were removed
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &V) -> bool,
    {
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !predicate(key.as_str(), &entry.value));
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .invalidation_count
            .fetch_add(removed, Ordering::Relaxed);
        removed
    }

    // Drops stale entries eagerly; reads already do this lazily per key
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before.saturating_sub(self.entries.len());
        self.stats.expired_count.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.entries.len(),
            hit_count: self.stats.hit_count.load(Ordering::Relaxed),
            miss_count: self.stats.miss_count.load(Ordering::Relaxed),
            expired_count: self.stats.expired_count.load(Ordering::Relaxed),
            invalidation_count: self.stats.invalidation_count.load(Ordering::Relaxed),
        }
    }
}
