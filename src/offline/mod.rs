//! Offline-first client layer
//!
//! Intercepted requests are classified by `RouteRules` and served by one
//! of the cache `Strategies`. Writes that cannot reach the server are kept
//! in the `MutationQueue` and replayed in order once connectivity returns.
//! `OfflineWorker` ties these together behind install/activate/fetch and
//! control-message entry points.

mod cache;
mod queue;
mod request;
mod router;
mod strategies;
mod transport;
mod worker;

#[cfg(test)]
mod testing;

pub use cache::{CacheNames, CacheStore, ResourceClass};
pub use queue::{
    MemoryQueueStore, MutationQueue, QueueError, QueueStatus, QueueStorage, QueuedMutation,
    ReplayOutcome, ReplayTrigger, SqliteQueueStore,
};
pub use request::{cache_key, FetchRequest, FetchResponse, RequestMode, OFFLINE_HEADER, QUEUED_HEADER};
pub use router::{RouteRules, Strategy};
pub use strategies::{CacheLimits, FallbackPages, Strategies};
pub use transport::{FetchError, Fetcher, HttpFetcher};
pub use worker::{ControlMessage, ControlReply, OfflineWorker, WorkerError};
