//! Subdomain cache

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

/// Subdomain cache entry
#[derive(Debug, Clone)]
pub struct SubdomainCacheEntry {
    pub backend_url: String,
    pub expires_at: Instant,
}

impl SubdomainCacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Application name to backend URL, each entry with its own expiry.
///
/// Reads skip expired entries but leave them in place; [`sweep`] removes
/// them.
///
/// [`sweep`]: SubdomainCache::sweep
pub struct SubdomainCache {
    entries: RwLock<HashMap<String, SubdomainCacheEntry>>,
    ttl: Duration,
}

impl SubdomainCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live backend URL for `name`
    pub fn get(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(name)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.backend_url.clone())
    }

    pub fn insert(&self, name: &str, backend_url: impl Into<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            name.to_string(),
            SubdomainCacheEntry {
                backend_url: backend_url.into(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, name: &str) -> Option<SubdomainCacheEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(name)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
