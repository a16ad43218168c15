//! Versioned response caches
//!
//! A cache store holds named namespaces of URL -> response entries. Each
//! resource class gets one namespace per cache version, e.g. `spc-api-v1`.
//!
//! # Eviction
//!
//! Lookups never promote an entry, so `trim` always drops the entries that
//! were stored longest ago. Storing a key again counts as a fresh insert.
//!
//! # Thread Safety
//!
//! Namespaces live behind a `tokio::sync::RwLock`; lookups share the read
//! lock and only inserts, trims and deletes take the write lock.
//!
//! # Expiry
//!
//! A namespace may carry a max age. Older entries are never served and are
//! removed by `purge_expired`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::request::FetchResponse;

/// Kinds of resource that get their own namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Content-hashed build output and precached entry points
    Static,
    /// Allow-listed API reads
    Api,
    /// Full-page navigations
    Pages,
    /// Everything else
    Dynamic,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Static,
        ResourceClass::Api,
        ResourceClass::Pages,
        ResourceClass::Dynamic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Static => "static",
            ResourceClass::Api => "api",
            ResourceClass::Pages => "pages",
            ResourceClass::Dynamic => "dynamic",
        }
    }
}

/// Namespace names for one cache version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    version: String,
}

impl CacheNames {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self, class: ResourceClass) -> String {
        format!("spc-{}-{}", class.as_str(), self.version)
    }

    /// The namespaces that survive activation
    pub fn current(&self) -> Vec<String> {
        ResourceClass::ALL.iter().map(|c| self.name(*c)).collect()
    }
}

#[derive(Clone)]
struct Entry {
    response: FetchResponse,
    stored_at: Instant,
}

type Namespace = LruCache<String, Entry>;

#[derive(Default)]
pub struct CacheStore {
    namespaces: RwLock<BTreeMap<String, Namespace>>,
    max_ages: parking_lot::RwLock<HashMap<String, Duration>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop serving entries of `namespace` once they are older than `max_age`
    pub fn set_max_age(&self, namespace: &str, max_age: Duration) {
        self.max_ages.write().insert(namespace.to_string(), max_age);
    }

    fn is_fresh(&self, namespace: &str, entry: &Entry) -> bool {
        match self.max_ages.read().get(namespace) {
            Some(max_age) => entry.stored_at.elapsed() <= *max_age,
            None => true,
        }
    }

    /// Create an empty namespace if it does not exist yet
    pub async fn open(&self, namespace: &str) {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_insert_with(LruCache::unbounded);
    }

    pub async fn put(&self, namespace: &str, key: &str, response: FetchResponse) {
        let mut namespaces = self.namespaces.write().await;
        let cache = namespaces
            .entry(namespace.to_string())
            .or_insert_with(LruCache::unbounded);
        // Remove first so a re-store moves the key to the newest position
        cache.pop(key);
        cache.put(
            key.to_string(),
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<FetchResponse> {
        let namespaces = self.namespaces.read().await;
        let entry = namespaces.get(namespace)?.peek(key)?;
        self.is_fresh(namespace, entry).then(|| entry.response.clone())
    }

    /// Look a key up across every namespace
    pub async fn match_any(&self, key: &str) -> Option<FetchResponse> {
        let namespaces = self.namespaces.read().await;
        namespaces.iter().find_map(|(name, cache)| {
            let entry = cache.peek(key)?;
            self.is_fresh(name, entry).then(|| entry.response.clone())
        })
    }

    /// Drop expired entries from every namespace with a max age; returns
    /// how many went
    pub async fn purge_expired(&self) -> usize {
        let max_ages = self.max_ages.read().clone();
        let mut namespaces = self.namespaces.write().await;

        let mut removed = 0;
        for (name, max_age) in &max_ages {
            let Some(cache) = namespaces.get_mut(name) else {
                continue;
            };
            let expired: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.stored_at.elapsed() > *max_age)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                cache.pop(key);
            }
            removed += expired.len();
        }
        if removed > 0 {
            tracing::debug!(removed = removed, "Purged expired cache entries");
        }
        removed
    }

    pub async fn delete_entry(&self, namespace: &str, key: &str) -> bool {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .get_mut(namespace)
            .map_or(false, |cache| cache.pop(key).is_some())
    }

    pub async fn len(&self, namespace: &str) -> usize {
        let namespaces = self.namespaces.read().await;
        namespaces.get(namespace).map_or(0, |cache| cache.len())
    }

    /// Keys of a namespace, oldest first
    pub async fn keys(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.read().await;
        match namespaces.get(namespace) {
            Some(cache) => cache.iter().rev().map(|(k, _)| k.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Evict oldest entries until at most `max` remain; returns how many went
    pub async fn trim(&self, namespace: &str, max: usize) -> usize {
        let mut namespaces = self.namespaces.write().await;
        let Some(cache) = namespaces.get_mut(namespace) else {
            return 0;
        };

        let mut evicted = 0;
        while cache.len() > max {
            if cache.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(namespace = namespace, evicted = evicted, "Trimmed cache");
        }
        evicted
    }

    pub async fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().await.keys().cloned().collect()
    }

    pub async fn delete_namespace(&self, namespace: &str) -> bool {
        self.namespaces.write().await.remove(namespace).is_some()
    }

    /// Drop every namespace; returns how many existed
    pub async fn clear_all(&self) -> usize {
        let mut namespaces = self.namespaces.write().await;
        let count = namespaces.len();
        namespaces.clear();
        count
    }

    /// Delete every namespace not in `valid`; returns the deleted names
    pub async fn purge_except(&self, valid: &[String]) -> Vec<String> {
        let mut namespaces = self.namespaces.write().await;
        let stale: Vec<String> = namespaces
            .keys()
            .filter(|name| !valid.contains(name))
            .cloned()
            .collect();
        for name in &stale {
            namespaces.remove(name);
        }
        stale
    }
}
