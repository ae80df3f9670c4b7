// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded, time-boxed memo store for evaluated expressions
//!
//! Keys pair the normalized expression text with a context fingerprint. Reads
//! use `peek`, so the LRU order only changes on insert: eviction removes the
//! least-recently-inserted entry. Entries past their ttl are dropped on the read
//! that finds them stale.

use lru::LruCache;
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::model::Value;

/// How the context part of a cache key is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Hash the whole context
    #[default]
    Full,
    /// Hash only the context data the expression statically reads
    Dependencies,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Whether results are cached at all
    pub enabled: bool,
    /// Maximum number of entries
    pub max_size: usize,
    /// Entry lifetime in milliseconds
    #[serde(rename = "ttl")]
    pub ttl_ms: u64,
    /// Fingerprint granularity
    pub fingerprint: FingerprintMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1_000,
            ttl_ms: 5 * 60 * 1_000,
            fingerprint: FingerprintMode::Full,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with caching disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Cache key: normalized expression text plus context fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    expression: String,
    fingerprint: u64,
}

impl CacheKey {
    /// Build a key; the expression is normalized first
    pub fn new(expression: &str, fingerprint: u64) -> Self {
        Self {
            expression: normalize_expression(expression),
            fingerprint,
        }
    }

    /// Context fingerprint part
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Trim and collapse whitespace runs outside string literals
pub fn normalize_expression(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for ch in text.trim().chars() {
        if let Some(q) = quote {
            normalized.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            normalized.push(' ');
            pending_space = false;
        }
        if matches!(ch, '\'' | '"' | '`') {
            quote = Some(ch);
        }
        normalized.push(ch);
    }
    normalized
}

/// Incremental fingerprint over runtime values
#[derive(Default)]
pub struct Fingerprint {
    hasher: FxHasher,
}

impl Fingerprint {
    /// Start an empty fingerprint
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix in a label (root name, key)
    pub fn label(&mut self, label: &str) -> &mut Self {
        label.hash(&mut self.hasher);
        self
    }

    /// Mix in a value, structurally
    pub fn value(&mut self, value: &Value) -> &mut Self {
        hash_value(value, &mut self.hasher);
        self
    }

    /// Final hash
    pub fn finish(&self) -> u64 {
        self.hasher.finish()
    }
}

/// Structural hash of a value without converting it
pub fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Undefined | Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Number(n) => n.to_bits().hash(state),
        Value::String(s) => s.hash(state),
        Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            map.len().hash(state);
            for (key, item) in map {
                key.hash(state);
                hash_value(item, state);
            }
        }
        Value::DateTime(dt) => {
            dt.timestamp_millis().hash(state);
            dt.offset().local_minus_utc().hash(state);
        }
        Value::Function(lambda) => lambda.params.hash(state),
        Value::Host(host) => host.to_string().hash(state),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created) >= self.ttl
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (including expired entries)
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries dropped because their ttl passed
    pub expirations: u64,
    /// Current entry count
    pub size: usize,
    /// Maximum entry count
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate hit ratio as percentage
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Thread-safe bounded cache of evaluated values
pub struct EvaluationCache {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl EvaluationCache {
    /// Create a cache from configuration; a zero size is treated as one entry
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl: config.ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.peek(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Stale: re-check under the write lock, another thread may have refreshed it
        let mut entries = self.entries.write();
        match entries.peek(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or refresh an entry, evicting the oldest insert when full
    pub fn insert(&self, key: CacheKey, value: Value) {
        let entry = CacheEntry {
            value,
            created: Instant::now(),
            ttl: self.ttl,
        };
        let mut entries = self.entries.write();
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current number of entries (stale entries count until read)
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.entries.read().cap().get()
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) {
        self.entries.write().clear();
        for counter in [&self.hits, &self.misses, &self.evictions, &self.expirations] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl std::fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("EvaluationCache")
            .field("capacity", &stats.capacity)
            .field("len", &stats.size)
            .field("hit_ratio", &format!("{:.1}%", stats.hit_ratio()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn cache(max_size: usize, ttl_ms: u64) -> EvaluationCache {
        EvaluationCache::new(&CacheConfig {
            max_size,
            ttl_ms,
            ..Default::default()
        })
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = cache(3, 60_000);
        let key = CacheKey::new("1 + 1", 7);
        assert_eq!(cache.get(&key), None);
        cache.insert(key.clone(), Value::Number(2.0));
        assert_eq!(cache.get(&key), Some(Value::Number(2.0)));
        assert_eq!(cache.get(&CacheKey::new("1 + 1", 8)), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_normalization_shares_keys() {
        assert_eq!(CacheKey::new("  1 +\n 1 ", 0), CacheKey::new("1 + 1", 0));
        assert_ne!(CacheKey::new("'a  b'", 0), CacheKey::new("'a b'", 0));
    }

    #[test]
    fn test_bound_evicts_oldest_insert() {
        let cache = cache(2, 60_000);
        let k1 = CacheKey::new("a", 0);
        let k2 = CacheKey::new("b", 0);
        let k3 = CacheKey::new("c", 0);
        cache.insert(k1.clone(), Value::from(1.0));
        cache.insert(k2.clone(), Value::from(2.0));
        // Reading does not protect an entry from eviction
        assert!(cache.get(&k1).is_some());
        cache.insert(k3.clone(), Value::from(3.0));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&k1), None);
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_never_exceeds_max_size() {
        let cache = cache(10, 60_000);
        for i in 0..25 {
            cache.insert(CacheKey::new(&format!("$json.v{i}"), i), Value::from(i as f64));
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.stats().evictions, 15);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = cache(4, 20);
        let key = CacheKey::new("x", 1);
        cache.insert(key.clone(), Value::from("v"));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(cache(64, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let key = CacheKey::new("$json.value", (t * 1000 + i) % 100);
                        match cache.get(&key) {
                            Some(value) => assert_eq!(value, Value::from(key.fingerprint() as f64)),
                            None => cache.insert(key.clone(), Value::from(key.fingerprint() as f64)),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert!(cache.len() <= 64);
    }

    #[test]
    fn test_fingerprint_is_structural() {
        let a = Value::from(&serde_json::json!({"a": [1, 2], "b": "x"}));
        let b = Value::from(&serde_json::json!({"a": [1, 2], "b": "x"}));
        let c = Value::from(&serde_json::json!({"a": [1, 3], "b": "x"}));
        let hash = |v: &Value| Fingerprint::new().value(v).finish();
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(hash(&a), hash(&c));
    }
}
