//! Bounded time-to-live caches.
//!
//! [`AggregateCache`] memoizes per-tenant aggregates between screen visits.
//! It is an owned value held by the request loop, never a global, so each
//! test can build its own.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::calc::expenses::ExpenseReport;
use crate::calc::fees::FeeOverview;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `max_entries` of 0 is treated as 1.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Stale entries are evicted on the way out.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let fresh = match self.entries.get(key) {
            Some(e) => now.saturating_duration_since(e.stored_at) < self.ttl,
            None => return None,
        };
        if fresh {
            self.entries.get(key).map(|e| e.value.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Overwrites any prior entry. At capacity, expired entries go first,
    /// then the oldest one.
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired_at(now);
            if self.entries.len() >= self.max_entries {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    self.entries.remove(&k);
                }
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Removes every entry whose key matches, returning how many went.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !pred(k));
        before - self.entries.len()
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats_at(&self, now: Instant) -> CacheStats {
        let active = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.stored_at) < self.ttl)
            .count();
        CacheStats {
            total_entries: self.entries.len(),
            active_entries: active,
            expired_entries: self.entries.len() - active,
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
            max_entries: self.max_entries,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub dataset: &'static str,
    pub params: String,
}

impl CacheKey {
    pub fn new(tenant_id: &str, dataset: &'static str, params: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            dataset,
            params: params.into(),
        }
    }
}

pub const FEE_OVERVIEW: &str = "fee_overview";
pub const EXPENSE_BREAKDOWN: &str = "expense_breakdown";

#[derive(Debug, Clone)]
pub enum Aggregate {
    Fees(FeeOverview),
    Expenses(ExpenseReport),
}

pub type AggregateCache = TtlCache<CacheKey, Aggregate>;

impl<V: Clone> TtlCache<CacheKey, V> {
    /// Drops every entry of one tenant, leaving other tenants untouched.
    pub fn clear_tenant(&mut self, tenant_id: &str) -> usize {
        let removed = self.remove_where(|k| k.tenant_id == tenant_id);
        debug!(tenant_id, removed, "cleared tenant aggregate cache");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tenant: &str, params: &str) -> CacheKey {
        CacheKey::new(tenant, FEE_OVERVIEW, params)
    }

    #[test]
    fn entry_is_served_until_ttl_then_evicted() {
        let t0 = Instant::now();
        let mut cache: TtlCache<CacheKey, u32> = TtlCache::new(Duration::from_secs(300), 16);
        cache.insert_at(key("a", ""), 7, t0);

        assert_eq!(cache.get_at(&key("a", ""), t0 + Duration::from_secs(299)), Some(7));
        assert_eq!(cache.get_at(&key("a", ""), t0 + Duration::from_secs(300)), None);
        assert!(cache.is_empty(), "stale entry should be evicted on read");
    }

    #[test]
    fn insert_overwrites_and_restarts_the_clock() {
        let t0 = Instant::now();
        let mut cache: TtlCache<CacheKey, u32> = TtlCache::new(Duration::from_secs(10), 16);
        cache.insert_at(key("a", ""), 1, t0);
        cache.insert_at(key("a", ""), 2, t0 + Duration::from_secs(8));
        assert_eq!(cache.get_at(&key("a", ""), t0 + Duration::from_secs(15)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clearing_a_tenant_leaves_other_tenants_intact() {
        let t0 = Instant::now();
        let mut cache: TtlCache<CacheKey, u32> = TtlCache::new(Duration::from_secs(300), 16);
        cache.insert_at(key("a", ""), 1, t0);
        cache.insert_at(key("a", "2024-25"), 2, t0);
        cache.insert_at(key("a_b", ""), 3, t0);
        cache.insert_at(key("b", ""), 4, t0);

        assert_eq!(cache.clear_tenant("a"), 2);
        assert_eq!(cache.get_at(&key("a_b", ""), t0), Some(3));
        assert_eq!(cache.get_at(&key("b", ""), t0), Some(4));
        assert_eq!(cache.get_at(&key("a", ""), t0), None);
    }

    #[test]
    fn bound_prefers_expired_entries_then_oldest() {
        let t0 = Instant::now();
        let mut cache: TtlCache<CacheKey, u32> = TtlCache::new(Duration::from_secs(10), 2);
        cache.insert_at(key("a", ""), 1, t0);
        cache.insert_at(key("b", ""), 2, t0 + Duration::from_secs(5));
        // "a" has expired by now, so it goes and "b" survives.
        cache.insert_at(key("c", ""), 3, t0 + Duration::from_secs(12));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&key("b", ""), t0 + Duration::from_secs(12)), Some(2));

        // Nothing expired: the oldest ("b") is evicted.
        cache.insert_at(key("d", ""), 4, t0 + Duration::from_secs(13));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&key("b", ""), t0 + Duration::from_secs(13)), None);
        assert_eq!(cache.get_at(&key("c", ""), t0 + Duration::from_secs(13)), Some(3));
    }

    #[test]
    fn stats_split_active_and_expired() {
        let t0 = Instant::now();
        let mut cache: TtlCache<CacheKey, u32> = TtlCache::new(Duration::from_secs(10), 8);
        cache.insert_at(key("a", ""), 1, t0);
        cache.insert_at(key("b", ""), 2, t0 + Duration::from_secs(6));
        let stats = cache.stats_at(t0 + Duration::from_secs(11));
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.active_entries, 1);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.ttl_ms, 10_000);
    }
}
