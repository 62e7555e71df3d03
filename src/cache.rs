use bytes::Bytes;
use clap::ValueEnum;
use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// How cache keys are derived from a request.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum CacheKeyPolicy {
    /// Key by request URI only. Any forwarded response, whatever its method,
    /// is stored under the URI and can later answer a GET to it.
    #[default]
    Target,
    /// Key by method and URI, so only GET responses answer GETs.
    MethodAndTarget,
}

impl CacheKeyPolicy {
    pub fn key(self, method: &Method, uri: &str) -> String {
        match self {
            CacheKeyPolicy::Target => uri.to_string(),
            CacheKeyPolicy::MethodAndTarget => format!("{} {}", method, uri),
        }
    }
}

/// A fully read upstream response.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    content: CachedResponse,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn content(&self) -> &CachedResponse {
        &self.content
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// In-memory response cache with lazy TTL expiry.
///
/// All access goes through a single reader/writer lock. Plain lookups share
/// the lock; stores and the eviction of expired entries take it exclusively.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl ResponseCache {
    /// `ttl` applies to every stored entry; `None` keeps entries until they
    /// are overwritten.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Look up a fresh entry, evicting it if it has expired.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.content.clone()),
                Some(_) => {}
            }
        }

        // Expired. The entry may have been replaced between dropping the read
        // guard and acquiring the write guard, so check again before removing.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.content.clone()),
            None => None,
        }
    }

    /// Replace whatever is stored under `key` with a new entry.
    pub async fn store(&self, key: &str, content: CachedResponse) {
        let entry = CacheEntry {
            content,
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
    }

    /// Snapshot of all stored entries, sorted by key. Expired entries that
    /// have not been looked up since expiring are still included.
    pub async fn list(&self) -> Vec<(String, CacheEntry)> {
        let entries = self.entries.read().await;
        let mut snapshot: Vec<(String, CacheEntry)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        snapshot.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }
}
