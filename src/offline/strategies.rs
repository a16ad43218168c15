//! Cache strategies
//!
//! One async method per `Strategy`. Each takes a request and always
//! produces a response; only a passthrough can surface a `FetchError`.

use std::sync::Arc;

use super::cache::{CacheNames, CacheStore, ResourceClass};
use super::queue::MutationQueue;
use super::request::{FetchRequest, FetchResponse};
use super::router::{RouteRules, Strategy};
use super::transport::{FetchError, Fetcher};

/// Entry ceilings for the trimmed namespaces
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub api: usize,
    pub pages: usize,
    pub dynamic: usize,
}

/// Cache keys for the navigation fallbacks
#[derive(Debug, Clone)]
pub struct FallbackPages {
    pub offline: String,
    pub root: String,
}

pub struct Strategies {
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    queue: Arc<MutationQueue>,
    rules: Arc<RouteRules>,
    names: CacheNames,
    limits: CacheLimits,
    fallbacks: FallbackPages,
}

impl Strategies {
    pub fn new(
        cache: Arc<CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        queue: Arc<MutationQueue>,
        rules: Arc<RouteRules>,
        names: CacheNames,
        limits: CacheLimits,
        fallbacks: FallbackPages,
    ) -> Self {
        Self {
            cache,
            fetcher,
            queue,
            rules,
            names,
            limits,
            fallbacks,
        }
    }

    pub async fn handle(
        &self,
        strategy: Strategy,
        request: FetchRequest,
    ) -> Result<FetchResponse, FetchError> {
        let response = match strategy {
            Strategy::Passthrough => return self.fetcher.fetch(&request).await,
            Strategy::Mutation => self.mutation(&request).await,
            Strategy::CacheFirst => self.cache_first(&request).await,
            Strategy::NetworkFirstApi => self.network_first_api(&request).await,
            Strategy::NetworkFirstNavigation => self.network_first_navigation(&request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::NetworkFirstDynamic => self.network_first_dynamic(&request).await,
        };
        Ok(response)
    }

    /// Send a write; queue it and acknowledge when the network is unreachable
    pub async fn mutation(&self, request: &FetchRequest) -> FetchResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %request.url, "Mutation failed, queueing: {}", e);
                match self.queue.enqueue(request).await {
                    Ok(id) => FetchResponse::queued(Some(id)),
                    Err(qe) => {
                        // The write is lost; the caller still gets an acknowledgement
                        tracing::error!(
                            method = %request.method,
                            url = %request.url,
                            "Failed to persist queued mutation: {}",
                            qe
                        );
                        FetchResponse::queued(None)
                    }
                }
            }
        }
    }

    /// Immutable assets: the cached copy is always good
    pub async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
        let namespace = self.names.name(ResourceClass::Static);
        let key = request.cache_key();

        if let Some(hit) = self.cache.get(&namespace, &key).await {
            return hit;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_method() && response.is_success() {
                    self.cache.put(&namespace, &key, response.clone()).await;
                }
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url, "Asset fetch failed: {}", e);
                FetchResponse::service_unavailable()
            }
        }
    }

    pub async fn network_first_api(&self, request: &FetchRequest) -> FetchResponse {
        let namespace = self.names.name(ResourceClass::Api);
        let key = request.cache_key();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_method()
                    && response.is_success()
                    && self.rules.is_cacheable_api(request.url.path())
                {
                    self.cache.put(&namespace, &key, response.clone()).await;
                    self.cache.trim(&namespace, self.limits.api).await;
                }
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url, "API fetch failed, trying cache: {}", e);
                match self.cache.get(&namespace, &key).await {
                    Some(hit) => hit,
                    None => FetchResponse::offline_api(),
                }
            }
        }
    }

    /// Pages fall back to the same page, then the offline page, then the root
    pub async fn network_first_navigation(&self, request: &FetchRequest) -> FetchResponse {
        let namespace = self.names.name(ResourceClass::Pages);
        let key = request.cache_key();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_method() && response.is_success() {
                    self.cache.put(&namespace, &key, response.clone()).await;
                    self.cache.trim(&namespace, self.limits.pages).await;
                }
                response
            }
            Err(e) => {
                tracing::debug!(url = %request.url, "Navigation failed, serving fallback: {}", e);
                for candidate in [&key, &self.fallbacks.offline, &self.fallbacks.root] {
                    if let Some(hit) = self.cache.match_any(candidate).await {
                        return hit;
                    }
                }
                FetchResponse::service_unavailable()
            }
        }
    }

    /// Serve the cached copy now and refresh it in the background
    pub async fn stale_while_revalidate(&self, request: FetchRequest) -> FetchResponse {
        let namespace = self.names.name(ResourceClass::Static);
        let key = request.cache_key();

        if let Some(hit) = self.cache.get(&namespace, &key).await {
            let cache = self.cache.clone();
            let fetcher = self.fetcher.clone();
            tokio::spawn(async move {
                match fetcher.fetch(&request).await {
                    Ok(fresh) if fresh.is_success() => cache.put(&namespace, &key, fresh).await,
                    Ok(fresh) => {
                        tracing::debug!(url = %request.url, status = %fresh.status, "Revalidation skipped")
                    }
                    Err(e) => tracing::debug!(url = %request.url, "Revalidation failed: {}", e),
                }
            });
            return hit;
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if request.is_cacheable_method() && response.is_success() {
                    self.cache.put(&namespace, &key, response.clone()).await;
                }
                response
            }
            Err(_) => FetchResponse::service_unavailable(),
        }
    }

    pub async fn network_first_dynamic(&self, request: &FetchRequest) -> FetchResponse {
        let namespace = self.names.name(ResourceClass::Dynamic);
        let key = request.cache_key();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.is_cacheable_method() && response.is_success() {
                    self.cache.put(&namespace, &key, response.clone()).await;
                    self.cache.trim(&namespace, self.limits.dynamic).await;
                }
                response
            }
            Err(_) => match self.cache.get(&namespace, &key).await {
                Some(hit) => hit,
                None => FetchResponse::service_unavailable(),
            },
        }
    }
}
