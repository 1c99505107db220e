//! In-memory TTL cache for gateway results.
//!
//! Expiry is checked on read; expired entries are swept on write. Nothing runs
//! in the background.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use graphscout_core::CacheSettings;
use ring::digest::{Context, SHA256};
use serde_json::{Map, Value};
use tracing::debug;

struct CacheEntry {
    payload: Map<String, Value>,
    cached_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub enabled: bool,
    pub ttl: Duration,
}

pub struct QueryCache {
    enabled: bool,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl QueryCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            entries: HashMap::new(),
        }
    }

    /// Hex SHA-256 over the dataset id, the document and the serialized variables.
    pub fn key(dataset_id: &str, query: &str, variables: &Map<String, Value>) -> String {
        let mut ctx = Context::new(&SHA256);
        ctx.update(dataset_id.as_bytes());
        ctx.update(&[0]);
        ctx.update(query.as_bytes());
        ctx.update(&[0]);
        // Map keys serialize in sorted order, so equal maps hash equally.
        ctx.update(Value::Object(variables.clone()).to_string().as_bytes());
        ctx.finish()
            .as_ref()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A live entry for `key`; expired entries read as misses.
    pub fn get(&self, key: &str) -> Option<&Map<String, Value>> {
        if !self.enabled {
            return None;
        }
        self.entries
            .get(key)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| &e.payload)
    }

    /// Store a non-empty payload, then drop whatever has expired.
    pub fn insert(&mut self, key: String, payload: Map<String, Value>) {
        if !self.enabled || payload.is_empty() {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                cached_at: Instant::now(),
            },
        );
        self.sweep();
    }

    fn sweep(&mut self) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.cached_at.elapsed() < ttl);
        let swept = before - self.entries.len();
        if swept > 0 {
            debug!(swept, "expired cache entries removed");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            enabled: self.enabled,
            ttl: self.ttl,
        }
    }
}
