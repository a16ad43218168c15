//! Sync data types
//!
//! Defines the wire and storage types for push/pull synchronization:
//! - Per-entity version records
//! - Client changes and their per-change outcome
//! - Conflicts and their resolution
//! - The sync audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The server's authoritative revision for one business entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersion {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Monotonically increasing revision, starts at 1 on first accept
    pub version: u64,
    /// Server clock reading of the last accepted write
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Client that produced the last accepted write
    #[serde(rename = "updatedBy", skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl EntityVersion {
    /// First revision of an entity
    pub fn initial(entity_type: &str, entity_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            version: 1,
            updated_at: now,
            updated_by: None,
        }
    }

    /// The revision that follows `previous`, or the first one
    pub fn advance(
        previous: Option<&EntityVersion>,
        entity_type: &str,
        entity_id: &str,
        now: DateTime<Utc>,
        client_id: &str,
    ) -> Self {
        let mut next = match previous {
            Some(prev) => EntityVersion {
                version: prev.version + 1,
                updated_at: now,
                ..prev.clone()
            },
            None => EntityVersion::initial(entity_type, entity_id, now),
        };
        next.updated_by = Some(client_id.to_string());
        next
    }

    /// Snapshot marker of the server's state, carried on conflicts
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "entityType": self.entity_type,
            "entityId": self.entity_id,
            "version": self.version,
            "updatedAt": self.updated_at,
            "updatedBy": self.updated_by,
        })
    }
}

/// Kind of change a client made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A client-side change submitted through push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChange {
    /// Client-generated change ID
    pub id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub data: Value,
    /// When the client made the edit
    #[serde(rename = "clientTimestamp")]
    pub client_timestamp: DateTime<Utc>,
    /// The base version the client believed it was editing
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the client's data
    ClientWins,
    /// Keep the server's state
    ServerWins,
    /// Use caller-supplied merged data
    Merge,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::ClientWins => "client_wins",
            Resolution::ServerWins => "server_wins",
            Resolution::Merge => "merge",
        }
    }
}

/// A stale write waiting for (or settled by) resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    /// The rejected change
    #[serde(rename = "changeId")]
    pub change_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "clientData")]
    pub client_data: Value,
    #[serde(rename = "serverData")]
    pub server_data: Value,
    #[serde(rename = "clientTimestamp")]
    pub client_timestamp: DateTime<Utc>,
    #[serde(rename = "serverTimestamp")]
    pub server_timestamp: DateTime<Utc>,
    pub status: ConflictStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(rename = "resolvedData", skip_serializing_if = "Option::is_none")]
    pub resolved_data: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "resolvedAt", skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

/// Automatic conflict policies a client orchestrator can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoResolveStrategy {
    ClientWins,
    ServerWins,
    /// Later timestamp wins; the server wins ties
    NewestWins,
    /// Leave the conflict for a human
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Push,
    Pull,
    Resolve,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Push => "push",
            SyncAction::Pull => "pull",
            SyncAction::Resolve => "resolve",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Partial,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Partial => "partial",
            HistoryStatus::Failed => "failed",
        }
    }
}

/// One audit entry per coordinator call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub action: SyncAction,
    #[serde(rename = "changesCount")]
    pub changes_count: u64,
    #[serde(rename = "conflictsCount")]
    pub conflicts_count: u64,
    pub status: HistoryStatus,
    /// Wall time spent in the call, in milliseconds
    pub duration: u64,
    pub timestamp: DateTime<Utc>,
}

/// Who is calling the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    pub user_id: String,
    pub client_id: String,
}

impl SyncContext {
    pub fn new(user_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: client_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Applied,
    Conflict,
}

/// Outcome of a single pushed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    #[serde(rename = "changeId")]
    pub change_id: String,
    pub status: ChangeStatus,
    /// New version when applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "conflictId", skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
}

/// Request to push changes to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub changes: Vec<SyncChange>,
}

/// Response from push operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<ChangeResult>,
    /// Conflicts created by this push
    pub conflicts: Vec<Conflict>,
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
}

/// Position after the last entity of a pull page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCursor {
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
}

impl From<&EntityVersion> for PullCursor {
    fn from(v: &EntityVersion) -> Self {
        Self {
            updated_at: v.updated_at,
            entity_type: v.entity_type.clone(),
            entity_id: v.entity_id.clone(),
        }
    }
}

/// Request to pull changes from server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "lastSyncTimestamp")]
    pub last_sync_timestamp: DateTime<Utc>,
    #[serde(rename = "entityTypes", default, skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Continue after a previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PullCursor>,
}

/// Response from pull operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<EntityVersion>,
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<PullCursor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub resolution: Resolution,
    #[serde(rename = "mergedData", default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoResolveRequest {
    pub strategy: AutoResolveStrategy,
}

/// A settled conflict together with the entity's new revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub conflict: Conflict,
    pub version: EntityVersion,
}

/// Aggregate view over versions, conflicts and history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    #[serde(rename = "totalSyncs")]
    pub total_syncs: u64,
    pub pushes: u64,
    pub pulls: u64,
    pub resolves: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    #[serde(rename = "pendingConflicts")]
    pub pending_conflicts: u64,
    #[serde(rename = "resolvedConflicts")]
    pub resolved_conflicts: u64,
    #[serde(rename = "trackedEntities")]
    pub tracked_entities: u64,
    #[serde(rename = "lastSyncAt", skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}
