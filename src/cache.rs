//! Per-run context cache
//!
//! Functions memoise expensive host queries here (installed packages,
//! provides, systemd checks) for the lifetime of one [`ModuleContext`].
//! Mutating functions invalidate by key prefix.
//!
//! [`ModuleContext`]: crate::modules::ModuleContext

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }
}

/// String-keyed JSON memo shared through `Arc`
#[derive(Debug, Default)]
pub struct ContextCache {
    entries: RwLock<HashMap<String, Value>>,
    stats: CacheStats,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cloned entry
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.entries.read().get(key).cloned();
        if value.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.stats.record_invalidation(1);
        }
        removed
    }

    /// Drop every entry whose key starts with `prefix`; returns how many went
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        self.stats.record_invalidation(removed as u64);
        removed
    }

    /// Sorted keys, for debugging
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
