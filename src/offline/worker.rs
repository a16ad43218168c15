//! Offline worker
//!
//! Owns the caches, the route rules and the mutation queue, and exposes the
//! lifecycle a browser-side interceptor needs: install, activate, handle a
//! fetch, and react to control messages.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use super::cache::{CacheNames, CacheStore, ResourceClass};
use super::queue::{
    MutationQueue, QueueError, QueueStatus, QueueStorage, ReplayOutcome, ReplayTrigger,
    SqliteQueueStore,
};
use super::request::{cache_key, FetchRequest, FetchResponse};
use super::router::RouteRules;
use super::strategies::{CacheLimits, FallbackPages, Strategies};
use super::transport::{FetchError, Fetcher, HttpFetcher};
use crate::config::OfflineConfig;

const PRECACHE_CONCURRENCY: usize = 4;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid route pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid origin: {0}")]
    Origin(#[from] url::ParseError),

    #[error("Mutation queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Signals sent to the worker by the page or the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate the newest cache version immediately
    SkipWaiting,
    ClearAllCaches,
    GetVersion,
    ConnectivityRestored,
    ConnectivityLost,
    PrecacheAssets(Vec<String>),
    /// Platform background-sync event carrying its tag
    BackgroundSync(String),
    ReplayNow,
    GetQueueStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    Activated { purged: Vec<String> },
    Cleared { namespaces: usize },
    Version(String),
    Replayed(ReplayOutcome),
    Precached { stored: usize },
    QueueStatus(QueueStatus),
    Ack,
    /// Message did not apply, e.g. an unknown sync tag
    Ignored,
}

pub struct OfflineWorker {
    config: OfflineConfig,
    origin: Url,
    names: CacheNames,
    cache: Arc<CacheStore>,
    rules: Arc<RouteRules>,
    fetcher: Arc<dyn Fetcher>,
    queue: Arc<MutationQueue>,
    strategies: Strategies,
}

impl OfflineWorker {
    pub fn new(
        config: OfflineConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn QueueStorage>,
    ) -> Result<Self, WorkerError> {
        let origin = Url::parse(&config.origin)?;
        let names = CacheNames::new(config.cache_version.clone());
        let cache = Arc::new(CacheStore::new());
        if let Some(secs) = config.api_cache_max_age_secs {
            cache.set_max_age(&names.name(ResourceClass::Api), Duration::from_secs(secs));
        }
        let rules = Arc::new(RouteRules::from_config(&config)?);
        let queue = Arc::new(MutationQueue::new(storage, fetcher.clone()));

        let fallbacks = FallbackPages {
            offline: cache_key(&origin.join(&config.offline_page)?),
            root: cache_key(&origin.join("/")?),
        };
        let limits = CacheLimits {
            api: config.api_cache_max,
            pages: config.pages_cache_max,
            dynamic: config.dynamic_cache_max,
        };
        let strategies = Strategies::new(
            cache.clone(),
            fetcher.clone(),
            queue.clone(),
            rules.clone(),
            names.clone(),
            limits,
            fallbacks,
        );

        Ok(Self {
            config,
            origin,
            names,
            cache,
            rules,
            fetcher,
            queue,
            strategies,
        })
    }

    /// Build a worker on the real network with the durable queue at
    /// `config.queue_url`. Entries left by an earlier run count as pending.
    pub async fn connect(config: OfflineConfig) -> Result<Self, WorkerError> {
        let storage = SqliteQueueStore::connect(&config.queue_url).await?;
        let worker = Self::new(config, Arc::new(HttpFetcher::default()), Arc::new(storage))?;
        worker.queue.refresh_pending().await;
        Ok(worker)
    }

    pub fn version(&self) -> &str {
        self.names.version()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// Store the configured entry points; returns how many were cached
    pub async fn install(&self) -> usize {
        let urls = self.config.precache_urls.clone();
        let stored = self.precache(&urls).await;
        tracing::info!(
            version = self.version(),
            stored = stored,
            total = urls.len(),
            "Offline worker installed"
        );
        stored
    }

    /// Fetch and store each URL in the static namespace, skipping failures
    pub async fn precache(&self, urls: &[String]) -> usize {
        let namespace = self.names.name(ResourceClass::Static);
        self.cache.open(&namespace).await;

        stream::iter(urls)
            .map(|raw| self.precache_one(&namespace, raw))
            .buffer_unordered(PRECACHE_CONCURRENCY)
            .filter(|stored| futures::future::ready(*stored))
            .count()
            .await
    }

    async fn precache_one(&self, namespace: &str, raw: &str) -> bool {
        let url = match self.origin.join(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %raw, "Skipping invalid precache url: {}", e);
                return false;
            }
        };

        let request = FetchRequest::get(url);
        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_success() => {
                self.cache.put(namespace, &request.cache_key(), response).await;
                true
            }
            Ok(response) => {
                tracing::warn!(url = %request.url, status = %response.status, "Precache skipped");
                false
            }
            Err(e) => {
                tracing::warn!(url = %request.url, "Precache failed: {}", e);
                false
            }
        }
    }

    /// Delete every namespace that does not belong to the current version,
    /// then drop expired entries from the ones that remain
    pub async fn activate(&self) -> Vec<String> {
        let purged = self.cache.purge_except(&self.names.current()).await;
        for name in &purged {
            tracing::info!(namespace = %name, "Deleted stale cache");
        }
        self.cache.purge_expired().await;
        purged
    }

    /// Classify and serve an intercepted request
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let strategy = self.rules.classify(&request);
        tracing::trace!(url = %request.url, strategy = strategy.as_str(), "Intercepted request");
        self.strategies.handle(strategy, request).await
    }

    pub async fn handle_message(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::SkipWaiting => ControlReply::Activated {
                purged: self.activate().await,
            },
            ControlMessage::ClearAllCaches => {
                let namespaces = self.cache.clear_all().await;
                tracing::info!(namespaces = namespaces, "Cleared all caches");
                ControlReply::Cleared { namespaces }
            }
            ControlMessage::GetVersion => ControlReply::Version(self.version().to_string()),
            ControlMessage::ConnectivityRestored => {
                self.queue.set_online(true);
                ControlReply::Replayed(self.queue.replay(ReplayTrigger::ConnectivityRestored).await)
            }
            ControlMessage::ConnectivityLost => {
                self.queue.set_online(false);
                ControlReply::Ack
            }
            ControlMessage::PrecacheAssets(urls) => ControlReply::Precached {
                stored: self.precache(&urls).await,
            },
            ControlMessage::BackgroundSync(tag) => {
                if tag == self.config.background_sync_tag {
                    ControlReply::Replayed(self.queue.replay(ReplayTrigger::Background(tag)).await)
                } else {
                    tracing::debug!(tag = %tag, "Ignoring unknown sync tag");
                    ControlReply::Ignored
                }
            }
            ControlMessage::ReplayNow => {
                ControlReply::Replayed(self.queue.replay(ReplayTrigger::Manual).await)
            }
            ControlMessage::GetQueueStatus => ControlReply::QueueStatus(self.queue.status()),
        }
    }

    /// Start the periodic replay task at the configured interval
    pub fn spawn_periodic_replay(&self) -> JoinHandle<()> {
        let every = Duration::from_secs(self.config.replay_interval_secs.max(1));
        self.queue.clone().spawn_periodic(every)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::queue::MemoryQueueStore;
    use crate::offline::testing::ScriptedFetcher;
    use reqwest::{Method, StatusCode};

    const ORIGIN: &str = "http://localhost:3000";

    fn url(path: &str) -> String {
        format!("{}{}", ORIGIN, path)
    }

    fn worker_with(config: OfflineConfig) -> (OfflineWorker, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let worker =
            OfflineWorker::new(config, fetcher.clone(), Arc::new(MemoryQueueStore::new())).unwrap();
        (worker, fetcher)
    }

    fn worker() -> (OfflineWorker, Arc<ScriptedFetcher>) {
        worker_with(OfflineConfig::default())
    }

    fn post(path: &str) -> FetchRequest {
        FetchRequest::new(Method::POST, Url::parse(&url(path)).unwrap()).with_body("{}")
    }

    #[tokio::test]
    async fn test_install_precaches_and_skips_failures() {
        let (worker, fetcher) = worker();
        fetcher.respond(&url("/"), FetchResponse::ok("<html>"));
        fetcher.respond(&url("/offline.html"), FetchResponse::ok("offline"));

        assert_eq!(worker.install().await, 2);
        let statics = worker.names.name(ResourceClass::Static);
        assert_eq!(worker.cache.len(&statics).await, 2);
    }

    #[tokio::test]
    async fn test_activation_keeps_only_current_version() {
        let config = OfflineConfig {
            cache_version: "v2".to_string(),
            ..OfflineConfig::default()
        };
        let (worker, _) = worker_with(config);
        for name in ["spc-api-v1", "spc-api-v2", "spc-static-v1"] {
            worker.cache.open(name).await;
        }

        let reply = worker.handle_message(ControlMessage::SkipWaiting).await;
        match reply {
            ControlReply::Activated { mut purged } => {
                purged.sort();
                assert_eq!(purged, vec!["spc-api-v1", "spc-static-v1"]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(worker.cache.namespace_names().await, vec!["spc-api-v2"]);
    }

    #[tokio::test]
    async fn test_offline_writes_queue_and_replay_on_reconnect() {
        let (worker, fetcher) = worker();
        fetcher.set_offline(true);
        worker.handle_message(ControlMessage::ConnectivityLost).await;

        for path in ["/api/trpc/spc.save", "/api/trpc/oee.record", "/api/trpc/spc.save"] {
            let response = worker.handle_fetch(post(path)).await.unwrap();
            assert_eq!(response.status, StatusCode::ACCEPTED);
        }
        assert_eq!(worker.queue.status().pending, 3);
        assert!(!worker.queue.status().online);

        fetcher.set_offline(false);
        fetcher.respond(&url("/api/trpc/spc.save"), FetchResponse::ok("{}"));
        fetcher.respond(&url("/api/trpc/oee.record"), FetchResponse::ok("{}"));

        let reply = worker.handle_message(ControlMessage::ConnectivityRestored).await;
        assert_eq!(
            reply,
            ControlReply::Replayed(ReplayOutcome::Completed { replayed: 3 })
        );
        let status = worker.queue.status();
        assert!(status.online);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_background_sync_tag() {
        let (worker, _) = worker();
        assert_eq!(
            worker
                .handle_message(ControlMessage::BackgroundSync("other".to_string()))
                .await,
            ControlReply::Ignored
        );
        assert_eq!(
            worker
                .handle_message(ControlMessage::BackgroundSync("sync-pending-data".to_string()))
                .await,
            ControlReply::Replayed(ReplayOutcome::Completed { replayed: 0 })
        );
    }

    #[tokio::test]
    async fn test_version_and_clear() {
        let (worker, fetcher) = worker();
        fetcher.respond(&url("/manifest.json"), FetchResponse::ok("{}"));

        assert_eq!(
            worker.handle_message(ControlMessage::GetVersion).await,
            ControlReply::Version("v1".to_string())
        );
        assert_eq!(
            worker
                .handle_message(ControlMessage::PrecacheAssets(vec![
                    "/manifest.json".to_string(),
                    "/missing.png".to_string(),
                ]))
                .await,
            ControlReply::Precached { stored: 1 }
        );
        assert_eq!(
            worker.handle_message(ControlMessage::ClearAllCaches).await,
            ControlReply::Cleared { namespaces: 1 }
        );
    }

    #[tokio::test]
    async fn test_handle_fetch_routes_immutable_assets_through_cache() {
        let (worker, fetcher) = worker();
        let path = "/assets/vendor-a1b2c3d4e5.js";
        fetcher.respond(&url(path), FetchResponse::ok("bundle"));

        for _ in 0..3 {
            let request = FetchRequest::get(Url::parse(&url(path)).unwrap());
            let response = worker.handle_fetch(request).await.unwrap();
            assert_eq!(response.body, "bundle");
        }
        assert_eq!(fetcher.calls_to(&url(path)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_api_reads_are_not_served_offline() {
        let config = OfflineConfig {
            api_cache_max_age_secs: Some(300),
            ..OfflineConfig::default()
        };
        let (worker, fetcher) = worker_with(config);
        let path = "/api/trpc/spc.list";
        fetcher.respond(&url(path), FetchResponse::ok("[1]"));
        let read = || FetchRequest::get(Url::parse(&url(path)).unwrap());

        worker.handle_fetch(read()).await.unwrap();
        fetcher.set_offline(true);

        tokio::time::advance(Duration::from_secs(120)).await;
        let cached = worker.handle_fetch(read()).await.unwrap();
        assert_eq!(cached.body, "[1]");

        tokio::time::advance(Duration::from_secs(300)).await;
        let expired = worker.handle_fetch(read()).await.unwrap();
        assert!(expired.is_offline());

        worker.activate().await;
        assert_eq!(worker.cache.len(&worker.names.name(ResourceClass::Api)).await, 0);
    }

    #[tokio::test]
    async fn test_connect_uses_configured_queue_and_http() {
        // Nothing listens on port 1, so every write fails over to the queue
        let config = OfflineConfig {
            origin: "http://127.0.0.1:1".to_string(),
            queue_url: "sqlite::memory:".to_string(),
            ..OfflineConfig::default()
        };
        let worker = OfflineWorker::connect(config).await.unwrap();
        assert_eq!(worker.queue.status().pending, 0);

        let request = FetchRequest::new(
            Method::POST,
            Url::parse("http://127.0.0.1:1/api/trpc/spc.save").unwrap(),
        )
        .with_body(r#"{"usl":10}"#);
        let response = worker.handle_fetch(request).await.unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);

        let pending = worker.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url.path(), "/api/trpc/spc.save");
        assert_eq!(worker.queue.status().pending, 1);
    }

    #[tokio::test]
    async fn test_connect_counts_entries_from_earlier_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = OfflineConfig {
            origin: "http://127.0.0.1:1".to_string(),
            queue_url: format!("sqlite://{}", dir.path().join("queue.db").display()),
            ..OfflineConfig::default()
        };

        {
            let store = SqliteQueueStore::connect(&config.queue_url).await.unwrap();
            store
                .append(&post("/api/trpc/oee.record"), chrono::Utc::now())
                .await
                .unwrap();
        }

        let worker = OfflineWorker::connect(config).await.unwrap();
        assert_eq!(worker.queue.status().pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_replay_drains_while_online() {
        let config = OfflineConfig {
            replay_interval_secs: 30,
            ..OfflineConfig::default()
        };
        let (worker, fetcher) = worker_with(config);
        fetcher.set_offline(true);
        worker.handle_fetch(post("/api/trpc/spc.save")).await.unwrap();
        fetcher.set_offline(false);
        fetcher.respond(&url("/api/trpc/spc.save"), FetchResponse::ok("{}"));

        let mut rx = worker.queue.subscribe();
        let handle = worker.spawn_periodic_replay();

        tokio::time::advance(Duration::from_secs(31)).await;
        while rx.borrow_and_update().pending > 0 {
            rx.changed().await.unwrap();
        }
        handle.abort();

        assert!(worker.queue.pending().await.unwrap().is_empty());
    }
}
