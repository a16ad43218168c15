//! Request classification
//!
//! `RouteRules::classify` picks exactly one strategy for a request before
//! any network activity. Rules are checked in order and the first match
//! wins:
//!
//! 1. non-HTTP schemes and realtime upgrades pass through
//! 2. writes to the API go to the mutation path
//! 3. content-hashed assets are cache-first
//! 4. other API calls are network-first with cache fallback
//! 5. navigations are network-first with page fallbacks
//! 6. static assets are stale-while-revalidate
//! 7. anything else is network-first into the dynamic cache

use regex::Regex;

use super::request::{FetchRequest, RequestMode};
use crate::config::OfflineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Passthrough,
    Mutation,
    CacheFirst,
    NetworkFirstApi,
    NetworkFirstNavigation,
    StaleWhileRevalidate,
    NetworkFirstDynamic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Passthrough => "passthrough",
            Strategy::Mutation => "mutation",
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirstApi => "network-first-api",
            Strategy::NetworkFirstNavigation => "network-first-navigation",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkFirstDynamic => "network-first-dynamic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteRules {
    api_prefix: String,
    hashed_asset: Regex,
    static_asset: Regex,
    cacheable_api: Vec<Regex>,
}

impl RouteRules {
    pub fn from_config(config: &OfflineConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            api_prefix: config.api_prefix.clone(),
            hashed_asset: Regex::new(&config.hashed_asset_pattern)?,
            static_asset: Regex::new(&config.static_asset_pattern)?,
            cacheable_api: config
                .cacheable_api_patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn classify(&self, request: &FetchRequest) -> Strategy {
        let path = request.url.path();

        if !matches!(request.url.scheme(), "http" | "https") || request.is_upgrade() {
            return Strategy::Passthrough;
        }

        let is_api = path.starts_with(&self.api_prefix);
        if is_api && !request.is_read() {
            return Strategy::Mutation;
        }
        if self.hashed_asset.is_match(path) {
            return Strategy::CacheFirst;
        }
        if is_api {
            return Strategy::NetworkFirstApi;
        }
        if request.mode == RequestMode::Navigate {
            return Strategy::NetworkFirstNavigation;
        }
        if self.static_asset.is_match(path) {
            return Strategy::StaleWhileRevalidate;
        }
        Strategy::NetworkFirstDynamic
    }

    /// Whether a successful read of `path` may be stored in the API cache
    pub fn is_cacheable_api(&self, path: &str) -> bool {
        self.cacheable_api.iter().any(|re| re.is_match(path))
    }
}
