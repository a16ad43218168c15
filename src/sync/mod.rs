//! Sync module for multi-device synchronization
//!
//! Provides:
//! - Per-entity version tracking
//! - Timestamp-based conflict detection
//! - Push/pull sync operations with an audit trail
//!
//! # Sync Protocol
//!
//! 1. Client sends a `PushRequest` with its queued changes
//! 2. Changes made before the server's last write to the entity become conflicts
//! 3. Everything else is applied and bumps the entity's version
//! 4. Client resolves conflicts with `client_wins`, `server_wins` or `merge`
//! 5. Client sends a `PullRequest` to fetch versions changed since its last sync

mod clock;
mod conflict;
mod coordinator;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::ConflictResolver;
pub use coordinator::{EntityLocks, SyncCoordinator, DEFAULT_PULL_PAGE_SIZE, MAX_HISTORY_LIMIT};
pub use store::{
    ConflictCounts, HistorySummary, MemorySyncStore, SqliteSyncStore, StoreResult, SyncStore,
    VersionQuery,
};
pub use types::{
    AutoResolveRequest, AutoResolveStrategy, ChangeAction, ChangeResult, ChangeStatus, Conflict,
    ConflictStatus, EntityVersion, HistoryStatus, PullCursor, PullRequest, PullResponse,
    PushRequest, PushResponse, Resolution, ResolveRequest, ResolveResponse, SyncAction,
    SyncChange, SyncContext, SyncHistoryRecord, SyncStats,
};
