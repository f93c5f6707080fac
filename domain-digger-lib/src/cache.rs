//! Request cache contract and an in-memory implementation.
//!
//! Transports consult the cache before going to the network. Entries are
//! keyed by `(kind, key)`, e.g. `("rdap", "example.com")`, and expire after
//! the TTL passed with each call. A TTL too large to represent never expires.
//! Expired entries are swept every [`PURGE_INTERVAL`] writes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::CacheSettings;

pub const PURGE_INTERVAL: usize = 64;

/// Per-call cache options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub enabled: bool,
    pub ttl: Duration,
}

impl From<&CacheSettings> for CacheOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: Duration::from_secs(settings.ttl_secs),
        }
    }
}

#[async_trait]
pub trait RequestCache: Send + Sync {
    async fn get(&self, kind: &str, key: &str, opts: CacheOptions) -> Option<String>;
    async fn set(&self, kind: &str, key: &str, value: &str, opts: CacheOptions);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RequestCache for MemoryCache {
    async fn get(&self, kind: &str, key: &str, opts: CacheOptions) -> Option<String> {
        if !opts.enabled {
            return None;
        }
        let entries = self.entries.read().await;
        entries
            .get(&(kind.to_string(), key.to_string()))
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    async fn set(&self, kind: &str, key: &str, value: &str, opts: CacheOptions) {
        if !opts.enabled || opts.ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_INTERVAL == 0 {
            entries.retain(|_, entry| entry.is_live(now));
        }
        entries.insert(
            (kind.to_string(), key.to_string()),
            CacheEntry {
                value: value.to_string(),
                expires_at: now.checked_add(opts.ttl),
            },
        );
    }
}
