//! # Muster Cache - Check Memoization Layer
//!
//! Memoizes resolved sub-checks keyed by `(object, relation, subject,
//! schema version, revision)`. Keys are revision-exact: a later revision
//! never reuses an earlier entry, so there is no invalidation plumbing at
//! all. Staleness is structurally impossible; eviction only costs latency.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use muster_types::{Decision, ObjectRef, Revision, SubjectRef};
use serde::{Deserialize, Serialize};

/// Cache key for a resolved sub-check.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCacheKey {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    /// Display form of the subject (`principal:sarah`, `group:eng#member`).
    pub subject: String,
    /// Entries never outlive the schema version they were computed under.
    pub schema_version: u64,
    pub revision: Revision,
}

impl CheckCacheKey {
    pub fn new(
        object: &ObjectRef,
        relation: &str,
        subject: &SubjectRef,
        schema_version: u64,
        revision: Revision,
    ) -> Self {
        Self {
            object_type: object.object_type.clone(),
            object_id: object.object_id.clone(),
            relation: relation.to_string(),
            subject: subject.to_string(),
            schema_version,
            revision,
        }
    }
}

/// Bounded, TTL'd memoization cache for check decisions.
pub struct CheckCache {
    entries: Cache<CheckCacheKey, Decision>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CheckCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build();

        Self { entries, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    /// Get a memoized decision, counting the hit or miss.
    pub async fn get(&self, key: &CheckCacheKey) -> Option<Decision> {
        let result = self.entries.get(key).await;
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Memoize a decision. Concurrent writers racing on the same key are
    /// idempotent: one key+revision always maps to one value.
    pub async fn insert(&self, key: CheckCacheKey, decision: Decision) {
        self.entries.insert(key, decision).await;
    }

    /// Number of live entries (approximate until pending tasks run).
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Affects latency only, never correctness.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Flush moka's pending maintenance so `len()` is exact. Test helper.
    pub async fn sync(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { (hits as f64 / total as f64) * 100.0 } else { 0.0 };

        CacheStats { hits, misses, hit_rate, entries: self.entries.entry_count() }
    }
}

impl Default for CheckCache {
    /// 10k entries, 5 minute TTL.
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(300))
    }
}

/// A point-in-time statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage of lookups.
    pub hit_rate: f64,
    pub entries: u64,
}
