//! Sync state persistence
//!
//! The `SyncStore` trait is the coordinator's only view of versions,
//! conflicts and history. Two implementations are provided: an in-memory
//! store for tests and single-process deployments, and a SQLite store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use sqlx::SqlitePool;

use super::types::{
    Conflict, ConflictStatus, EntityVersion, HistoryStatus, PullCursor, Resolution, SyncAction,
    SyncHistoryRecord,
};
use crate::error::SyncError;

pub type StoreResult<T> = std::result::Result<T, SyncError>;

/// Range scan over entity versions, ordered by `(updated_at, entity_type, entity_id)`
#[derive(Debug, Clone)]
pub struct VersionQuery {
    /// Exclusive lower bound on `updated_at`
    pub since: DateTime<Utc>,
    /// Restrict to these entity types; `None` or empty means all
    pub entity_types: Option<Vec<String>>,
    /// Exclusive position to resume after
    pub after: Option<PullCursor>,
    pub limit: usize,
}

impl VersionQuery {
    fn type_filter(&self) -> Option<&[String]> {
        self.entity_types.as_deref().filter(|types| !types.is_empty())
    }
}

/// Counts over the audit trail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySummary {
    pub pushes: u64,
    pub pulls: u64,
    pub resolves: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl HistorySummary {
    fn count(&mut self, action: SyncAction, status: HistoryStatus, n: u64) {
        match action {
            SyncAction::Push => self.pushes += n,
            SyncAction::Pull => self.pulls += n,
            SyncAction::Resolve => self.resolves += n,
        }
        match status {
            HistoryStatus::Success => self.successful += n,
            HistoryStatus::Partial => self.partial += n,
            HistoryStatus::Failed => self.failed += n,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictCounts {
    pub pending: u64,
    pub resolved: u64,
}

/// Backing store for the sync coordinator
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Look up the version record for one entity
    async fn get_version(&self, entity_type: &str, entity_id: &str)
        -> StoreResult<Option<EntityVersion>>;

    /// Insert or replace a version record
    async fn put_version(&self, version: &EntityVersion) -> StoreResult<()>;

    /// Versions updated after `query.since`, at most `query.limit` of them
    async fn versions_since(&self, query: &VersionQuery) -> StoreResult<Vec<EntityVersion>>;

    async fn count_versions(&self) -> StoreResult<u64>;

    async fn insert_conflict(&self, conflict: &Conflict) -> StoreResult<()>;

    async fn get_conflict(&self, id: &str) -> StoreResult<Option<Conflict>>;

    /// Persist the resolution of a pending conflict.
    ///
    /// Returns `false` without writing if the stored conflict is no longer
    /// pending.
    async fn mark_resolved(&self, conflict: &Conflict) -> StoreResult<bool>;

    /// Pending conflicts, most recent first
    async fn pending_conflicts(&self) -> StoreResult<Vec<Conflict>>;

    async fn conflict_counts(&self) -> StoreResult<ConflictCounts>;

    async fn append_history(&self, record: &SyncHistoryRecord) -> StoreResult<()>;

    /// Most recent history records first
    async fn recent_history(&self, limit: usize) -> StoreResult<Vec<SyncHistoryRecord>>;

    async fn history_summary(&self) -> StoreResult<HistorySummary>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store
#[derive(Default)]
pub struct MemorySyncStore {
    versions: RwLock<BTreeMap<(String, String), EntityVersion>>,
    /// Insertion order is creation order
    conflicts: RwLock<Vec<Conflict>>,
    history: RwLock<Vec<SyncHistoryRecord>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_key(v: &EntityVersion) -> (DateTime<Utc>, &str, &str) {
    (v.updated_at, v.entity_type.as_str(), v.entity_id.as_str())
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn get_version(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityVersion>> {
        let versions = self.versions.read();
        Ok(versions
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn put_version(&self, version: &EntityVersion) -> StoreResult<()> {
        let mut versions = self.versions.write();
        versions.insert(
            (version.entity_type.clone(), version.entity_id.clone()),
            version.clone(),
        );
        Ok(())
    }

    async fn versions_since(&self, query: &VersionQuery) -> StoreResult<Vec<EntityVersion>> {
        let versions = self.versions.read();
        let types = query.type_filter();

        let mut matched: Vec<&EntityVersion> = versions
            .values()
            .filter(|v| v.updated_at > query.since)
            .filter(|v| types.map_or(true, |t| t.contains(&v.entity_type)))
            .filter(|v| match &query.after {
                Some(c) => {
                    sort_key(v)
                        > (c.updated_at, c.entity_type.as_str(), c.entity_id.as_str())
                }
                None => true,
            })
            .collect();
        matched.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        Ok(matched.into_iter().take(query.limit).cloned().collect())
    }

    async fn count_versions(&self) -> StoreResult<u64> {
        Ok(self.versions.read().len() as u64)
    }

    async fn insert_conflict(&self, conflict: &Conflict) -> StoreResult<()> {
        self.conflicts.write().push(conflict.clone());
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> StoreResult<Option<Conflict>> {
        let conflicts = self.conflicts.read();
        Ok(conflicts.iter().find(|c| c.id == id).cloned())
    }

    async fn mark_resolved(&self, conflict: &Conflict) -> StoreResult<bool> {
        let mut conflicts = self.conflicts.write();
        match conflicts.iter_mut().find(|c| c.id == conflict.id) {
            Some(stored) if stored.is_pending() => {
                *stored = conflict.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_conflicts(&self) -> StoreResult<Vec<Conflict>> {
        let conflicts = self.conflicts.read();
        // Reverse first so the stable sort keeps later inserts ahead on ties
        let mut pending: Vec<Conflict> = conflicts
            .iter()
            .rev()
            .filter(|c| c.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn conflict_counts(&self) -> StoreResult<ConflictCounts> {
        let conflicts = self.conflicts.read();
        let pending = conflicts.iter().filter(|c| c.is_pending()).count() as u64;
        Ok(ConflictCounts {
            pending,
            resolved: conflicts.len() as u64 - pending,
        })
    }

    async fn append_history(&self, record: &SyncHistoryRecord) -> StoreResult<()> {
        self.history.write().push(record.clone());
        Ok(())
    }

    async fn recent_history(&self, limit: usize) -> StoreResult<Vec<SyncHistoryRecord>> {
        let history = self.history.read();
        let mut records: Vec<SyncHistoryRecord> = history.iter().rev().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    async fn history_summary(&self) -> StoreResult<HistorySummary> {
        let history = self.history.read();
        let mut summary = HistorySummary::default();
        for record in history.iter() {
            summary.count(record.action, record.status, 1);
        }
        summary.last_sync_at = history.iter().map(|r| r.timestamp).max();
        Ok(summary)
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// SQLite-backed store over the tables in `db::schema`
#[derive(Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
}

impl SqliteSyncStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the sync tables if they are missing
    pub async fn init(&self) -> StoreResult<()> {
        crate::db::initialize_schema(&self.pool).await?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so that text order matches time order
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get_version(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT entity_type, entity_id, version, updated_at, updated_by
            FROM entity_versions
            WHERE entity_type = ? AND entity_id = ?
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VersionRow::into_version).transpose()
    }

    async fn put_version(&self, version: &EntityVersion) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_versions (entity_type, entity_id, version, updated_at, updated_by)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                version = excluded.version,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
        )
        .bind(&version.entity_type)
        .bind(&version.entity_id)
        .bind(version.version as i64)
        .bind(ts(&version.updated_at))
        .bind(&version.updated_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn versions_since(&self, query: &VersionQuery) -> StoreResult<Vec<EntityVersion>> {
        let mut sql = String::from(
            "SELECT entity_type, entity_id, version, updated_at, updated_by \
             FROM entity_versions WHERE updated_at > ?",
        );

        let types = query.type_filter();
        if let Some(types) = types {
            let placeholders: Vec<&str> = types.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND entity_type IN ({})", placeholders.join(", ")));
        }
        if query.after.is_some() {
            sql.push_str(" AND (updated_at, entity_type, entity_id) > (?, ?, ?)");
        }
        sql.push_str(" ORDER BY updated_at ASC, entity_type ASC, entity_id ASC LIMIT ?");

        let mut q = sqlx::query_as::<_, VersionRow>(&sql).bind(ts(&query.since));
        if let Some(types) = types {
            for t in types {
                q = q.bind(t);
            }
        }
        if let Some(cursor) = &query.after {
            q = q
                .bind(ts(&cursor.updated_at))
                .bind(&cursor.entity_type)
                .bind(&cursor.entity_id);
        }
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        rows.into_iter().map(VersionRow::into_version).collect()
    }

    async fn count_versions(&self) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entity_versions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn insert_conflict(&self, conflict: &Conflict) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_conflicts (
                id, change_id, entity_type, entity_id, client_data, server_data,
                client_timestamp, server_timestamp, status, resolution,
                resolved_data, created_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conflict.id)
        .bind(&conflict.change_id)
        .bind(&conflict.entity_type)
        .bind(&conflict.entity_id)
        .bind(serde_json::to_string(&conflict.client_data)?)
        .bind(serde_json::to_string(&conflict.server_data)?)
        .bind(ts(&conflict.client_timestamp))
        .bind(ts(&conflict.server_timestamp))
        .bind(status_str(conflict.status))
        .bind(conflict.resolution.map(|r| r.as_str()))
        .bind(
            conflict
                .resolved_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(ts(&conflict.created_at))
        .bind(conflict.resolved_at.as_ref().map(ts))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> StoreResult<Option<Conflict>> {
        let row = sqlx::query_as::<_, ConflictRow>(&format!(
            "SELECT {} FROM sync_conflicts WHERE id = ?",
            CONFLICT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConflictRow::into_conflict).transpose()
    }

    async fn mark_resolved(&self, conflict: &Conflict) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts
            SET status = ?, resolution = ?, resolved_data = ?, resolved_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status_str(conflict.status))
        .bind(conflict.resolution.map(|r| r.as_str()))
        .bind(
            conflict
                .resolved_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(conflict.resolved_at.as_ref().map(ts))
        .bind(&conflict.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_conflicts(&self) -> StoreResult<Vec<Conflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(&format!(
            "SELECT {} FROM sync_conflicts WHERE status = 'pending' \
             ORDER BY created_at DESC, rowid DESC",
            CONFLICT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConflictRow::into_conflict).collect()
    }

    async fn conflict_counts(&self) -> StoreResult<ConflictCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_conflicts GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = ConflictCounts::default();
        for (status, n) in rows {
            match parse_conflict_status(&status)? {
                ConflictStatus::Pending => counts.pending = n as u64,
                ConflictStatus::Resolved => counts.resolved = n as u64,
            }
        }
        Ok(counts)
    }

    async fn append_history(&self, record: &SyncHistoryRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (
                id, user_id, client_id, action, changes_count,
                conflicts_count, status, duration_ms, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.client_id)
        .bind(record.action.as_str())
        .bind(record.changes_count as i64)
        .bind(record.conflicts_count as i64)
        .bind(record.status.as_str())
        .bind(record.duration as i64)
        .bind(ts(&record.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_history(&self, limit: usize) -> StoreResult<Vec<SyncHistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, user_id, client_id, action, changes_count,
                   conflicts_count, status, duration_ms, timestamp
            FROM sync_history
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRow::into_record).collect()
    }

    async fn history_summary(&self) -> StoreResult<HistorySummary> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT action, status, COUNT(*) FROM sync_history GROUP BY action, status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = HistorySummary::default();
        for (action, status, n) in rows {
            summary.count(parse_action(&action)?, parse_history_status(&status)?, n as u64);
        }

        let (last,): (Option<String>,) = sqlx::query_as("SELECT MAX(timestamp) FROM sync_history")
            .fetch_one(&self.pool)
            .await?;
        summary.last_sync_at = last.as_deref().map(parse_ts).transpose()?;

        Ok(summary)
    }
}

const CONFLICT_COLUMNS: &str = "id, change_id, entity_type, entity_id, client_data, server_data, \
     client_timestamp, server_timestamp, status, resolution, resolved_data, created_at, resolved_at";

fn status_str(status: ConflictStatus) -> &'static str {
    match status {
        ConflictStatus::Pending => "pending",
        ConflictStatus::Resolved => "resolved",
    }
}

fn parse_conflict_status(s: &str) -> StoreResult<ConflictStatus> {
    match s {
        "pending" => Ok(ConflictStatus::Pending),
        "resolved" => Ok(ConflictStatus::Resolved),
        other => Err(SyncError::Storage(format!("unknown conflict status: {}", other))),
    }
}

fn parse_resolution(s: &str) -> StoreResult<Resolution> {
    match s {
        "client_wins" => Ok(Resolution::ClientWins),
        "server_wins" => Ok(Resolution::ServerWins),
        "merge" => Ok(Resolution::Merge),
        other => Err(SyncError::Storage(format!("unknown resolution: {}", other))),
    }
}

fn parse_action(s: &str) -> StoreResult<SyncAction> {
    match s {
        "push" => Ok(SyncAction::Push),
        "pull" => Ok(SyncAction::Pull),
        "resolve" => Ok(SyncAction::Resolve),
        other => Err(SyncError::Storage(format!("unknown sync action: {}", other))),
    }
}

fn parse_history_status(s: &str) -> StoreResult<HistoryStatus> {
    match s {
        "success" => Ok(HistoryStatus::Success),
        "partial" => Ok(HistoryStatus::Partial),
        "failed" => Ok(HistoryStatus::Failed),
        other => Err(SyncError::Storage(format!("unknown history status: {}", other))),
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    entity_type: String,
    entity_id: String,
    version: i64,
    updated_at: String,
    updated_by: Option<String>,
}

impl VersionRow {
    fn into_version(self) -> StoreResult<EntityVersion> {
        Ok(EntityVersion {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            version: self.version as u64,
            updated_at: parse_ts(&self.updated_at)?,
            updated_by: self.updated_by,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    change_id: String,
    entity_type: String,
    entity_id: String,
    client_data: String,
    server_data: String,
    client_timestamp: String,
    server_timestamp: String,
    status: String,
    resolution: Option<String>,
    resolved_data: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
}

impl ConflictRow {
    fn into_conflict(self) -> StoreResult<Conflict> {
        Ok(Conflict {
            id: self.id,
            change_id: self.change_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            client_data: serde_json::from_str(&self.client_data)?,
            server_data: serde_json::from_str(&self.server_data)?,
            client_timestamp: parse_ts(&self.client_timestamp)?,
            server_timestamp: parse_ts(&self.server_timestamp)?,
            status: parse_conflict_status(&self.status)?,
            resolution: self.resolution.as_deref().map(parse_resolution).transpose()?,
            resolved_data: self
                .resolved_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_ts(&self.created_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    user_id: String,
    client_id: String,
    action: String,
    changes_count: i64,
    conflicts_count: i64,
    status: String,
    duration_ms: i64,
    timestamp: String,
}

impl HistoryRow {
    fn into_record(self) -> StoreResult<SyncHistoryRecord> {
        Ok(SyncHistoryRecord {
            id: self.id,
            user_id: self.user_id,
            client_id: self.client_id,
            action: parse_action(&self.action)?,
            changes_count: self.changes_count as u64,
            conflicts_count: self.conflicts_count as u64,
            status: parse_history_status(&self.status)?,
            duration: self.duration_ms as u64,
            timestamp: parse_ts(&self.timestamp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_sqlite() -> SqliteSyncStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteSyncStore::new(pool);
        store.init().await.unwrap();
        store
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
    }

    fn version(entity_type: &str, entity_id: &str, v: u64, at: DateTime<Utc>) -> EntityVersion {
        EntityVersion {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            version: v,
            updated_at: at,
            updated_by: Some("client-1".to_string()),
        }
    }

    fn conflict(id: &str, created_at: DateTime<Utc>) -> Conflict {
        Conflict {
            id: id.to_string(),
            change_id: format!("chg-{}", id),
            entity_type: "spc_analysis".to_string(),
            entity_id: "123".to_string(),
            client_data: json!({"cpk": 1.2}),
            server_data: json!({"version": 1}),
            client_timestamp: created_at - Duration::seconds(10),
            server_timestamp: created_at - Duration::seconds(5),
            status: ConflictStatus::Pending,
            resolution: None,
            resolved_data: None,
            created_at,
            resolved_at: None,
        }
    }

    async fn exercise_versions(store: &dyn SyncStore) {
        assert!(store.get_version("spc_analysis", "1").await.unwrap().is_none());

        store.put_version(&version("spc_analysis", "1", 1, t(10))).await.unwrap();
        store.put_version(&version("spc_analysis", "2", 1, t(20))).await.unwrap();
        store.put_version(&version("oee_record", "9", 4, t(20))).await.unwrap();
        store.put_version(&version("spc_analysis", "1", 2, t(30))).await.unwrap();

        let v = store.get_version("spc_analysis", "1").await.unwrap().unwrap();
        assert_eq!(v.version, 2);
        assert_eq!(v.updated_at, t(30));
        assert_eq!(store.count_versions().await.unwrap(), 3);

        let all = store
            .versions_since(&VersionQuery {
                since: t(0),
                entity_types: None,
                after: None,
                limit: 10,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|v| v.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["9", "2", "1"]);

        let filtered = store
            .versions_since(&VersionQuery {
                since: t(15),
                entity_types: Some(vec!["spc_analysis".to_string()]),
                after: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|v| v.entity_type == "spc_analysis"));

        let page = store
            .versions_since(&VersionQuery {
                since: t(0),
                entity_types: None,
                after: Some(PullCursor::from(&all[0])),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].entity_id, "2");
    }

    async fn exercise_conflicts(store: &dyn SyncStore) {
        store.insert_conflict(&conflict("c-1", t(100))).await.unwrap();
        store.insert_conflict(&conflict("c-2", t(200))).await.unwrap();

        let pending = store.pending_conflicts().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-2", "c-1"]);

        let mut resolved = store.get_conflict("c-1").await.unwrap().unwrap();
        assert_eq!(resolved.client_data, json!({"cpk": 1.2}));
        resolved.status = ConflictStatus::Resolved;
        resolved.resolution = Some(Resolution::ServerWins);
        resolved.resolved_data = Some(resolved.server_data.clone());
        resolved.resolved_at = Some(t(300));

        assert!(store.mark_resolved(&resolved).await.unwrap());
        assert!(!store.mark_resolved(&resolved).await.unwrap());

        let stored = store.get_conflict("c-1").await.unwrap().unwrap();
        assert_eq!(stored.resolution, Some(Resolution::ServerWins));
        assert_eq!(stored.resolved_at, Some(t(300)));

        let counts = store.conflict_counts().await.unwrap();
        assert_eq!(counts, ConflictCounts { pending: 1, resolved: 1 });
    }

    async fn exercise_history(store: &dyn SyncStore) {
        for (i, (action, status)) in [
            (SyncAction::Push, HistoryStatus::Success),
            (SyncAction::Push, HistoryStatus::Partial),
            (SyncAction::Pull, HistoryStatus::Success),
        ]
        .into_iter()
        .enumerate()
        {
            store
                .append_history(&SyncHistoryRecord {
                    id: format!("h-{}", i),
                    user_id: "user-1".to_string(),
                    client_id: "client-1".to_string(),
                    action,
                    changes_count: 1,
                    conflicts_count: 0,
                    status,
                    duration: 3,
                    timestamp: t(i as i64),
                })
                .await
                .unwrap();
        }

        let recent = store.recent_history(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "h-2");

        let summary = store.history_summary().await.unwrap();
        assert_eq!(summary.pushes, 2);
        assert_eq!(summary.pulls, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.last_sync_at, Some(t(2)));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySyncStore::new();
        exercise_versions(&store).await;
        exercise_conflicts(&store).await;
        exercise_history(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = setup_sqlite().await;
        exercise_versions(&store).await;
        exercise_conflicts(&store).await;
        exercise_history(&store).await;
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let early = t(1) + Duration::microseconds(5);
        let late = t(1) + Duration::milliseconds(900);
        assert!(ts(&early) < ts(&late));
        assert_eq!(parse_ts(&ts(&early)).unwrap(), early);
    }
}
