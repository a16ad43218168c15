//! Push/pull coordinator
//!
//! Drives the server side of the sync protocol on top of a `SyncStore`.
//! Writes to one entity are serialized through `EntityLocks` so the
//! read-decide-write of a push or resolve cannot interleave with another
//! write to the same entity.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::conflict::ConflictResolver;
use super::store::{StoreResult, SyncStore, VersionQuery};
use super::types::{
    AutoResolveStrategy, ChangeResult, ChangeStatus, Conflict, EntityVersion, HistoryStatus,
    PullCursor, PullRequest, PullResponse, PushResponse, Resolution, ResolveResponse, SyncAction,
    SyncChange, SyncContext, SyncHistoryRecord, SyncStats,
};
use crate::config::MAX_PULL_PAGE_SIZE;
use crate::error::SyncError;

/// Default number of versions per pull page
pub const DEFAULT_PULL_PAGE_SIZE: usize = 500;

/// Maximum history records returned per query
pub const MAX_HISTORY_LIMIT: usize = 100;

type EntityKey = (String, String);

/// Per-entity async locks, dropped once nobody holds them
#[derive(Default)]
pub struct EntityLocks {
    locks: parking_lot::Mutex<HashMap<EntityKey, Weak<Mutex<()>>>>,
}

impl EntityLocks {
    pub async fn acquire(&self, entity_type: &str, entity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, weak| weak.strong_count() > 0);

            let key = (entity_type.to_string(), entity_id.to_string());
            match locks.get(&key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(key, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Number of entities currently locked or awaited
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// Server-side sync coordinator
pub struct SyncCoordinator {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    resolver: ConflictResolver,
    locks: EntityLocks,
    pull_page_size: usize,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            resolver: ConflictResolver::new(),
            locks: EntityLocks::default(),
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
        }
    }

    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.clamp(1, MAX_PULL_PAGE_SIZE);
        self
    }

    /// The coordinator's authoritative clock reading
    pub fn server_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply a batch of client changes.
    ///
    /// Each change is judged on its own; a conflict on one does not stop the
    /// others. Conflicts are reported in the results, not as errors.
    pub async fn push_changes(
        &self,
        ctx: &SyncContext,
        changes: Vec<SyncChange>,
    ) -> Result<PushResponse, SyncError> {
        let started = Instant::now();
        let total = changes.len() as u64;

        let mut results = Vec::with_capacity(changes.len());
        let mut conflicts = Vec::new();

        for change in &changes {
            match self.apply_change(ctx, change).await {
                Ok((result, conflict)) => {
                    results.push(result);
                    conflicts.extend(conflict);
                }
                Err(e) => {
                    tracing::error!(
                        client_id = %ctx.client_id,
                        change_id = %change.id,
                        "Push aborted: {}",
                        e
                    );
                    self.record(
                        ctx,
                        SyncAction::Push,
                        results.len() as u64,
                        conflicts.len() as u64,
                        HistoryStatus::Failed,
                        started,
                    )
                    .await
                    .unwrap_or_else(|he| tracing::warn!("Failed to record push failure: {}", he));
                    return Err(e);
                }
            }
        }

        let status = if conflicts.is_empty() {
            HistoryStatus::Success
        } else {
            HistoryStatus::Partial
        };
        self.record(
            ctx,
            SyncAction::Push,
            total,
            conflicts.len() as u64,
            status,
            started,
        )
        .await?;

        tracing::info!(
            client_id = %ctx.client_id,
            changes = total,
            conflicts = conflicts.len(),
            "Push complete"
        );

        Ok(PushResponse {
            results,
            conflicts,
            server_time: self.clock.now(),
        })
    }

    async fn apply_change(
        &self,
        ctx: &SyncContext,
        change: &SyncChange,
    ) -> StoreResult<(ChangeResult, Option<Conflict>)> {
        let _guard = self
            .locks
            .acquire(&change.entity_type, &change.entity_id)
            .await;

        let current = self
            .store
            .get_version(&change.entity_type, &change.entity_id)
            .await?;
        let now = self.clock.now();

        if let Some(conflict) = self
            .resolver
            .detect_conflict(change, current.as_ref(), now)
        {
            self.store.insert_conflict(&conflict).await?;
            tracing::debug!(
                change_id = %change.id,
                conflict_id = %conflict.id,
                entity_type = %change.entity_type,
                entity_id = %change.entity_id,
                "Stale change recorded as conflict"
            );
            let result = ChangeResult {
                change_id: change.id.clone(),
                status: ChangeStatus::Conflict,
                version: None,
                conflict_id: Some(conflict.id.clone()),
            };
            return Ok((result, Some(conflict)));
        }

        let next = EntityVersion::advance(
            current.as_ref(),
            &change.entity_type,
            &change.entity_id,
            now,
            &ctx.client_id,
        );
        self.store.put_version(&next).await?;

        Ok((
            ChangeResult {
                change_id: change.id.clone(),
                status: ChangeStatus::Applied,
                version: Some(next.version),
                conflict_id: None,
            },
            None,
        ))
    }

    /// Entity versions changed since the caller's last sync.
    ///
    /// Pages are ordered by `(updatedAt, entityType, entityId)`; pass the
    /// returned `nextCursor` back to continue while `hasMore` is set.
    pub async fn pull_changes(
        &self,
        ctx: &SyncContext,
        request: &PullRequest,
    ) -> Result<PullResponse, SyncError> {
        let started = Instant::now();
        let limit = request
            .limit
            .unwrap_or(self.pull_page_size)
            .clamp(1, MAX_PULL_PAGE_SIZE);

        // One extra row tells us whether another page exists
        let mut changes = self
            .store
            .versions_since(&VersionQuery {
                since: request.last_sync_timestamp,
                entity_types: request.entity_types.clone(),
                after: request.cursor.clone(),
                limit: limit + 1,
            })
            .await?;

        let has_more = changes.len() > limit;
        changes.truncate(limit);
        let next_cursor = if has_more {
            changes.last().map(PullCursor::from)
        } else {
            None
        };

        self.record(
            ctx,
            SyncAction::Pull,
            changes.len() as u64,
            0,
            HistoryStatus::Success,
            started,
        )
        .await?;

        tracing::debug!(
            client_id = %ctx.client_id,
            changes = changes.len(),
            has_more = has_more,
            "Pull complete"
        );

        Ok(PullResponse {
            changes,
            server_time: self.clock.now(),
            has_more,
            next_cursor,
        })
    }

    /// Pending conflicts, most recent first
    pub async fn get_conflicts(&self) -> Result<Vec<Conflict>, SyncError> {
        self.store.pending_conflicts().await
    }

    /// Settle a conflict and advance the entity's version
    pub async fn resolve_conflict(
        &self,
        ctx: &SyncContext,
        conflict_id: &str,
        resolution: Resolution,
        merged_data: Option<Value>,
    ) -> Result<ResolveResponse, SyncError> {
        let started = Instant::now();

        let conflict = self.find_conflict(conflict_id).await?;
        let _guard = self
            .locks
            .acquire(&conflict.entity_type, &conflict.entity_id)
            .await;

        // Re-read under the lock; another resolve may have won the race
        let conflict = self.find_conflict(conflict_id).await?;
        let now = self.clock.now();
        let resolved = self
            .resolver
            .resolve(&conflict, resolution, merged_data, now)?;

        if !self.store.mark_resolved(&resolved).await? {
            return Err(SyncError::InvalidState(format!(
                "conflict {} is already resolved",
                conflict_id
            )));
        }

        let current = self
            .store
            .get_version(&resolved.entity_type, &resolved.entity_id)
            .await?;
        let version = EntityVersion::advance(
            current.as_ref(),
            &resolved.entity_type,
            &resolved.entity_id,
            now,
            &ctx.client_id,
        );
        self.store.put_version(&version).await?;

        self.record(
            ctx,
            SyncAction::Resolve,
            1,
            1,
            HistoryStatus::Success,
            started,
        )
        .await?;

        tracing::info!(
            conflict_id = %conflict_id,
            resolution = resolution.as_str(),
            version = version.version,
            "Conflict resolved"
        );

        Ok(ResolveResponse {
            conflict: resolved,
            version,
        })
    }

    /// Resolve by policy; `Manual` leaves the conflict pending and returns `None`
    pub async fn auto_resolve(
        &self,
        ctx: &SyncContext,
        conflict_id: &str,
        strategy: AutoResolveStrategy,
    ) -> Result<Option<ResolveResponse>, SyncError> {
        let conflict = self.find_conflict(conflict_id).await?;
        match self.resolver.choose(&conflict, strategy) {
            Some(resolution) => self
                .resolve_conflict(ctx, conflict_id, resolution, None)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Most recent audit records first
    pub async fn history(&self, limit: usize) -> Result<Vec<SyncHistoryRecord>, SyncError> {
        self.store
            .recent_history(limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
    }

    pub async fn stats(&self) -> Result<SyncStats, SyncError> {
        let history = self.store.history_summary().await?;
        let conflicts = self.store.conflict_counts().await?;
        let tracked_entities = self.store.count_versions().await?;

        Ok(SyncStats {
            total_syncs: history.pushes + history.pulls + history.resolves,
            pushes: history.pushes,
            pulls: history.pulls,
            resolves: history.resolves,
            successful: history.successful,
            partial: history.partial,
            failed: history.failed,
            pending_conflicts: conflicts.pending,
            resolved_conflicts: conflicts.resolved,
            tracked_entities,
            last_sync_at: history.last_sync_at,
        })
    }

    async fn find_conflict(&self, conflict_id: &str) -> Result<Conflict, SyncError> {
        self.store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(conflict_id.to_string()))
    }

    async fn record(
        &self,
        ctx: &SyncContext,
        action: SyncAction,
        changes_count: u64,
        conflicts_count: u64,
        status: HistoryStatus,
        started: Instant,
    ) -> StoreResult<()> {
        let record = SyncHistoryRecord {
            id: Uuid::new_v4().to_string(),
            user_id: ctx.user_id.clone(),
            client_id: ctx.client_id.clone(),
            action,
            changes_count,
            conflicts_count,
            status,
            duration: started.elapsed().as_millis() as u64,
            timestamp: self.clock.now(),
        };
        self.store.append_history(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::clock::ManualClock;
    use crate::sync::store::{ConflictCounts, HistorySummary, MemorySyncStore};
    use crate::sync::types::{ChangeAction, ConflictStatus};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        clock: Arc<ManualClock>,
        ctx: SyncContext,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(t0() + Duration::seconds(1)));
        let coordinator =
            SyncCoordinator::with_clock(Arc::new(MemorySyncStore::new()), clock.clone());
        Harness {
            coordinator: Arc::new(coordinator),
            clock,
            ctx: SyncContext::new("user-1", "tablet-7"),
        }
    }

    fn change(id: &str, entity_id: &str, at: DateTime<Utc>) -> SyncChange {
        SyncChange {
            id: id.to_string(),
            entity_type: "spc_analysis".to_string(),
            entity_id: entity_id.to_string(),
            action: ChangeAction::Update,
            data: json!({"mean": 4.2}),
            client_timestamp: at,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_push_conflict_resolve_scenario() {
        let h = harness();

        let first = h
            .coordinator
            .push_changes(&h.ctx, vec![change("c1", "123", t0())])
            .await
            .unwrap();
        assert_eq!(first.results[0].status, ChangeStatus::Applied);
        assert_eq!(first.results[0].version, Some(1));
        assert!(first.conflicts.is_empty());

        h.clock.advance(Duration::seconds(1));
        let second = h
            .coordinator
            .push_changes(&h.ctx, vec![change("c2", "123", t0())])
            .await
            .unwrap();
        assert_eq!(second.results[0].status, ChangeStatus::Conflict);
        let conflict_id = second.results[0].conflict_id.clone().unwrap();
        assert_eq!(second.conflicts[0].id, conflict_id);

        let resolved = h
            .coordinator
            .resolve_conflict(&h.ctx, &conflict_id, Resolution::ServerWins, None)
            .await
            .unwrap();
        assert_eq!(resolved.conflict.status, ConflictStatus::Resolved);
        assert_eq!(
            resolved.conflict.resolved_data,
            Some(second.conflicts[0].server_data.clone())
        );
        assert_eq!(resolved.version.version, 2);
    }

    #[tokio::test]
    async fn test_stale_push_does_not_touch_version() {
        let h = harness();
        h.coordinator
            .push_changes(&h.ctx, vec![change("c1", "9", t0())])
            .await
            .unwrap();

        let before = h
            .coordinator
            .store
            .get_version("spc_analysis", "9")
            .await
            .unwrap()
            .unwrap();

        h.clock.advance(Duration::seconds(10));
        let stale = before.updated_at - Duration::milliseconds(1);
        h.coordinator
            .push_changes(&h.ctx, vec![change("c2", "9", stale)])
            .await
            .unwrap();

        let after = h
            .coordinator
            .store
            .get_version("spc_analysis", "9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_fresh_push_increases_version() {
        let h = harness();
        let mut last = 0;
        for i in 0..3 {
            let at = h.coordinator.server_time();
            let response = h
                .coordinator
                .push_changes(&h.ctx, vec![change(&format!("c{}", i), "7", at)])
                .await
                .unwrap();
            let version = response.results[0].version.unwrap();
            assert!(version > last);
            last = version;
            h.clock.advance(Duration::seconds(1));
        }
        assert_eq!(last, 3);
    }

    #[tokio::test]
    async fn test_batch_is_processed_per_change() {
        let h = harness();
        h.coordinator
            .push_changes(&h.ctx, vec![change("seed", "1", t0())])
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));

        let now = h.coordinator.server_time();
        let response = h
            .coordinator
            .push_changes(
                &h.ctx,
                vec![
                    change("a", "1", t0()),
                    change("b", "2", now),
                    change("c", "3", now),
                ],
            )
            .await
            .unwrap();

        let statuses: Vec<ChangeStatus> = response.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ChangeStatus::Conflict, ChangeStatus::Applied, ChangeStatus::Applied]
        );
        assert_eq!(response.server_time, now);

        let history = h.coordinator.history(10).await.unwrap();
        assert_eq!(history[0].status, HistoryStatus::Partial);
        assert_eq!(history[0].changes_count, 3);
        assert_eq!(history[0].conflicts_count, 1);
        assert_eq!(history[1].status, HistoryStatus::Success);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let h = harness();

        let missing = h
            .coordinator
            .resolve_conflict(&h.ctx, "nope", Resolution::ClientWins, None)
            .await;
        assert_eq!(missing.unwrap_err(), SyncError::NotFound("nope".to_string()));

        h.coordinator
            .push_changes(&h.ctx, vec![change("c1", "5", t0())])
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
        let pushed = h
            .coordinator
            .push_changes(&h.ctx, vec![change("c2", "5", t0())])
            .await
            .unwrap();
        let id = pushed.conflicts[0].id.clone();

        let no_merge = h
            .coordinator
            .resolve_conflict(&h.ctx, &id, Resolution::Merge, None)
            .await;
        assert!(matches!(no_merge, Err(SyncError::InvalidArgument(_))));

        let merged = json!({"mean": 4.0});
        h.coordinator
            .resolve_conflict(&h.ctx, &id, Resolution::Merge, Some(merged.clone()))
            .await
            .unwrap();

        let first = h
            .coordinator
            .resolve_conflict(&h.ctx, &id, Resolution::ClientWins, None)
            .await
            .unwrap_err();
        let second = h
            .coordinator
            .resolve_conflict(&h.ctx, &id, Resolution::ServerWins, None)
            .await
            .unwrap_err();
        assert!(matches!(first, SyncError::InvalidState(_)));
        assert_eq!(first, second);

        let stored = h.coordinator.store.get_conflict(&id).await.unwrap().unwrap();
        assert_eq!(stored.resolved_data, Some(merged));
        assert_eq!(stored.resolution, Some(Resolution::Merge));
    }

    #[tokio::test]
    async fn test_pull_is_idempotent_and_filtered() {
        let h = harness();
        let now = h.coordinator.server_time();
        let mut changes = vec![change("a", "1", now), change("b", "2", now)];
        changes.push(SyncChange {
            entity_type: "oee_record".to_string(),
            ..change("c", "3", now)
        });
        h.coordinator.push_changes(&h.ctx, changes).await.unwrap();

        let request = PullRequest {
            client_id: "tablet-7".to_string(),
            last_sync_timestamp: t0(),
            entity_types: None,
            limit: None,
            cursor: None,
        };
        let a = h.coordinator.pull_changes(&h.ctx, &request).await.unwrap();
        let b = h.coordinator.pull_changes(&h.ctx, &request).await.unwrap();
        assert_eq!(a.changes, b.changes);
        assert_eq!(a.changes.len(), 3);
        assert!(!a.has_more);

        let filtered = h
            .coordinator
            .pull_changes(
                &h.ctx,
                &PullRequest {
                    entity_types: Some(vec!["oee_record".to_string()]),
                    ..request.clone()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.changes.len(), 1);
        assert_eq!(filtered.changes[0].entity_id, "3");

        let later = h
            .coordinator
            .pull_changes(
                &h.ctx,
                &PullRequest {
                    last_sync_timestamp: a.server_time,
                    ..request
                },
            )
            .await
            .unwrap();
        assert!(later.changes.is_empty());
    }

    #[tokio::test]
    async fn test_pull_pages_with_cursor() {
        let h = harness();
        for i in 0..5 {
            let at = h.coordinator.server_time();
            h.coordinator
                .push_changes(&h.ctx, vec![change(&format!("c{}", i), &i.to_string(), at)])
                .await
                .unwrap();
            h.clock.advance(Duration::seconds(1));
        }

        let mut request = PullRequest {
            client_id: "tablet-7".to_string(),
            last_sync_timestamp: t0(),
            entity_types: None,
            limit: Some(2),
            cursor: None,
        };

        let mut seen = Vec::new();
        loop {
            let page = h.coordinator.pull_changes(&h.ctx, &request).await.unwrap();
            seen.extend(page.changes.iter().map(|v| v.entity_id.clone()));
            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            request.cursor = page.next_cursor;
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
    }

    /// Memory store that lets other tasks run between reading a version and
    /// handing it back, so unserialized writers would both see the old state
    struct YieldingStore(MemorySyncStore);

    #[async_trait::async_trait]
    impl SyncStore for YieldingStore {
        async fn get_version(
            &self,
            entity_type: &str,
            entity_id: &str,
        ) -> StoreResult<Option<EntityVersion>> {
            let current = self.0.get_version(entity_type, entity_id).await;
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            current
        }

        async fn put_version(&self, version: &EntityVersion) -> StoreResult<()> {
            self.0.put_version(version).await
        }

        async fn versions_since(&self, query: &VersionQuery) -> StoreResult<Vec<EntityVersion>> {
            self.0.versions_since(query).await
        }

        async fn count_versions(&self) -> StoreResult<u64> {
            self.0.count_versions().await
        }

        async fn insert_conflict(&self, conflict: &Conflict) -> StoreResult<()> {
            self.0.insert_conflict(conflict).await
        }

        async fn get_conflict(&self, id: &str) -> StoreResult<Option<Conflict>> {
            self.0.get_conflict(id).await
        }

        async fn mark_resolved(&self, conflict: &Conflict) -> StoreResult<bool> {
            self.0.mark_resolved(conflict).await
        }

        async fn pending_conflicts(&self) -> StoreResult<Vec<Conflict>> {
            self.0.pending_conflicts().await
        }

        async fn conflict_counts(&self) -> StoreResult<ConflictCounts> {
            self.0.conflict_counts().await
        }

        async fn append_history(&self, record: &SyncHistoryRecord) -> StoreResult<()> {
            self.0.append_history(record).await
        }

        async fn recent_history(&self, limit: usize) -> StoreResult<Vec<SyncHistoryRecord>> {
            self.0.recent_history(limit).await
        }

        async fn history_summary(&self) -> StoreResult<HistorySummary> {
            self.0.history_summary().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_pushes_to_same_entity_are_serialized() {
        let clock = Arc::new(ManualClock::new(t0() + Duration::seconds(1)));
        let coordinator = Arc::new(SyncCoordinator::with_clock(
            Arc::new(YieldingStore(MemorySyncStore::new())),
            clock,
        ));
        let ctx = SyncContext::new("user-1", "tablet-7");

        // Both racers carry the same client timestamp, older than server time
        let handles: Vec<_> = ["r1", "r2"]
            .into_iter()
            .map(|id| {
                let coordinator = coordinator.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    coordinator
                        .push_changes(&ctx, vec![change(id, "hot", t0())])
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap().results[0].status);
        }
        statuses.sort_by_key(|s| *s == ChangeStatus::Conflict);
        assert_eq!(statuses, vec![ChangeStatus::Applied, ChangeStatus::Conflict]);

        let version = coordinator
            .store
            .get_version("spc_analysis", "hot")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version.version, 1);
        assert_eq!(coordinator.get_conflicts().await.unwrap().len(), 1);
        assert_eq!(coordinator.locks.active(), 0);
    }

    #[tokio::test]
    async fn test_auto_resolve_and_stats() {
        let h = harness();
        h.coordinator
            .push_changes(&h.ctx, vec![change("c1", "1", t0())])
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
        let pushed = h
            .coordinator
            .push_changes(&h.ctx, vec![change("c2", "1", t0()), change("c3", "1", t0())])
            .await
            .unwrap();
        assert_eq!(h.coordinator.get_conflicts().await.unwrap().len(), 2);

        let manual = h
            .coordinator
            .auto_resolve(&h.ctx, &pushed.conflicts[0].id, AutoResolveStrategy::Manual)
            .await
            .unwrap();
        assert!(manual.is_none());

        let newest = h
            .coordinator
            .auto_resolve(&h.ctx, &pushed.conflicts[1].id, AutoResolveStrategy::NewestWins)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(newest.conflict.resolution, Some(Resolution::ServerWins));

        let stats = h.coordinator.stats().await.unwrap();
        assert_eq!(stats.pushes, 2);
        assert_eq!(stats.resolves, 1);
        assert_eq!(stats.total_syncs, 3);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.pending_conflicts, 1);
        assert_eq!(stats.resolved_conflicts, 1);
        assert_eq!(stats.tracked_entities, 1);
        assert!(stats.last_sync_at.is_some());
    }
}
