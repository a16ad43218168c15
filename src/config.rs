//! Configuration management for the SPC sync server and offline client

use serde::{Deserialize, Serialize};
use std::env;

/// Hard ceiling on a single pull page
pub const MAX_PULL_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Default number of entity versions returned per pull
    pub pull_page_size: usize,
    /// Backing store for versions, conflicts and history
    pub store: StoreBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Client-side caching and queueing settings
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
    /// Version tag baked into every cache namespace name
    pub cache_version: String,
    /// Origin relative paths are resolved against
    pub origin: String,
    pub api_prefix: String,
    pub api_cache_max: usize,
    pub dynamic_cache_max: usize,
    pub pages_cache_max: usize,
    /// Cached API reads older than this are not served
    pub api_cache_max_age_secs: Option<u64>,
    pub replay_interval_secs: u64,
    /// SQLite URL for the durable mutation queue
    pub queue_url: String,
    /// Background sync tag that triggers a replay
    pub background_sync_tag: String,
    /// Content-hashed, immutable build output
    pub hashed_asset_pattern: String,
    /// Static but unversioned assets
    pub static_asset_pattern: String,
    /// Read endpoints whose responses may be cached
    pub cacheable_api_patterns: Vec<String>,
    /// Entry points stored on install
    pub precache_urls: Vec<String>,
    pub offline_page: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        OfflineConfig {
            cache_version: "v1".to_string(),
            origin: "http://localhost:3000".to_string(),
            api_prefix: "/api/".to_string(),
            api_cache_max: 100,
            dynamic_cache_max: 50,
            pages_cache_max: 30,
            api_cache_max_age_secs: None,
            replay_interval_secs: 30,
            queue_url: "sqlite:./spc-offline-queue.db".to_string(),
            background_sync_tag: "sync-pending-data".to_string(),
            hashed_asset_pattern: r"^/assets/.+-[A-Za-z0-9_-]{8,}\.(js|mjs|css|woff2?|png|jpg|jpeg|svg|webp)$"
                .to_string(),
            static_asset_pattern: r"\.(js|css|png|jpg|jpeg|gif|svg|ico|webp|woff2?|ttf|json)$"
                .to_string(),
            cacheable_api_patterns: vec![
                r"^/api/trpc/spc\.".to_string(),
                r"^/api/trpc/oee\.".to_string(),
                r"^/api/trpc/dashboard\.".to_string(),
                r"^/api/trpc/machine\.(get|list)".to_string(),
                r"^/api/trpc/product\.list".to_string(),
            ],
            precache_urls: vec![
                "/".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
            ],
            offline_page: "/offline.html".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./spc-sync.db".to_string(),
            },
            sync: SyncConfig {
                pull_page_size: 500,
                store: StoreBackend::Sqlite,
            },
            offline: OfflineConfig::default(),
        }
    }
}

impl Config {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let offline = defaults.offline;

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            sync: SyncConfig {
                pull_page_size: parse_var("SYNC_PULL_PAGE_SIZE", defaults.sync.pull_page_size)
                    .clamp(1, MAX_PULL_PAGE_SIZE),
                store: match env::var("SYNC_STORE").unwrap_or_default().as_str() {
                    "memory" => StoreBackend::Memory,
                    _ => StoreBackend::Sqlite,
                },
            },
            offline: OfflineConfig {
                cache_version: env::var("CACHE_VERSION").unwrap_or(offline.cache_version),
                origin: env::var("OFFLINE_ORIGIN").unwrap_or(offline.origin),
                api_cache_max: parse_var("API_CACHE_MAX", offline.api_cache_max),
                dynamic_cache_max: parse_var("DYNAMIC_CACHE_MAX", offline.dynamic_cache_max),
                pages_cache_max: parse_var("PAGES_CACHE_MAX", offline.pages_cache_max),
                api_cache_max_age_secs: env::var("API_CACHE_MAX_AGE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .or(offline.api_cache_max_age_secs),
                replay_interval_secs: parse_var(
                    "REPLAY_INTERVAL_SECS",
                    offline.replay_interval_secs,
                ),
                queue_url: env::var("OFFLINE_QUEUE_URL").unwrap_or(offline.queue_url),
                ..offline
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
