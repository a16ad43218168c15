//! Conflict detection and resolution
//!
//! Staleness is decided by timestamps: a change made before the server's
//! last accepted write for the same entity cannot have seen that write.
//! Resolution never merges on its own; a `merge` needs caller-supplied data.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::types::{
    AutoResolveStrategy, Conflict, ConflictStatus, EntityVersion, Resolution, SyncChange,
};
use crate::error::SyncError;

/// Stateless conflict rules shared by push and resolve
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// A change is stale when the server accepted a write after the client's edit
    pub fn is_stale(&self, change: &SyncChange, current: Option<&EntityVersion>) -> bool {
        current.map_or(false, |v| v.updated_at > change.client_timestamp)
    }

    /// Build the pending conflict for a rejected change
    pub fn detect_conflict(
        &self,
        change: &SyncChange,
        current: Option<&EntityVersion>,
        now: DateTime<Utc>,
    ) -> Option<Conflict> {
        if !self.is_stale(change, current) {
            return None;
        }
        let server = current?;

        Some(Conflict {
            id: Uuid::new_v4().to_string(),
            change_id: change.id.clone(),
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            client_data: change.data.clone(),
            server_data: server.snapshot(),
            client_timestamp: change.client_timestamp,
            server_timestamp: server.updated_at,
            status: ConflictStatus::Pending,
            resolution: None,
            resolved_data: None,
            created_at: now,
            resolved_at: None,
        })
    }

    /// Settle a pending conflict, returning the resolved copy.
    ///
    /// Checks run in order: already resolved, then missing merge data.
    pub fn resolve(
        &self,
        conflict: &Conflict,
        resolution: Resolution,
        merged_data: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Conflict, SyncError> {
        if !conflict.is_pending() {
            return Err(SyncError::InvalidState(format!(
                "conflict {} is already resolved",
                conflict.id
            )));
        }

        let resolved_data = match resolution {
            Resolution::ClientWins => conflict.client_data.clone(),
            Resolution::ServerWins => conflict.server_data.clone(),
            Resolution::Merge => merged_data.ok_or_else(|| {
                SyncError::InvalidArgument("merge resolution requires mergedData".to_string())
            })?,
        };

        Ok(Conflict {
            status: ConflictStatus::Resolved,
            resolution: Some(resolution),
            resolved_data: Some(resolved_data),
            resolved_at: Some(now),
            ..conflict.clone()
        })
    }

    /// Pick a resolution for an automatic strategy; `None` means leave it pending
    pub fn choose(&self, conflict: &Conflict, strategy: AutoResolveStrategy) -> Option<Resolution> {
        match strategy {
            AutoResolveStrategy::ClientWins => Some(Resolution::ClientWins),
            AutoResolveStrategy::ServerWins => Some(Resolution::ServerWins),
            AutoResolveStrategy::NewestWins => {
                if conflict.client_timestamp > conflict.server_timestamp {
                    Some(Resolution::ClientWins)
                } else {
                    Some(Resolution::ServerWins)
                }
            }
            AutoResolveStrategy::Manual => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::ChangeAction;
    use chrono::Duration;
    use serde_json::json;

    fn make_change(client_timestamp: DateTime<Utc>) -> SyncChange {
        SyncChange {
            id: "chg-1".to_string(),
            entity_type: "spc_analysis".to_string(),
            entity_id: "123".to_string(),
            action: ChangeAction::Update,
            data: json!({"usl": 10.5}),
            client_timestamp,
            version: 1,
        }
    }

    fn server_version(updated_at: DateTime<Utc>) -> EntityVersion {
        EntityVersion {
            entity_type: "spc_analysis".to_string(),
            entity_id: "123".to_string(),
            version: 3,
            updated_at,
            updated_by: Some("client-2".to_string()),
        }
    }

    #[test]
    fn test_no_conflict_without_server_record() {
        let resolver = ConflictResolver::new();
        let change = make_change(Utc::now());
        assert!(resolver.detect_conflict(&change, None, Utc::now()).is_none());
    }

    #[test]
    fn test_equal_timestamps_are_not_stale() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        assert!(!resolver.is_stale(&make_change(now), Some(&server_version(now))));
    }

    #[test]
    fn test_stale_change_builds_pending_conflict() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let server = server_version(now);
        let change = make_change(now - Duration::seconds(1));

        let conflict = resolver.detect_conflict(&change, Some(&server), now).unwrap();
        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert_eq!(conflict.change_id, "chg-1");
        assert_eq!(conflict.client_data, json!({"usl": 10.5}));
        assert_eq!(conflict.server_data["version"], 3);
        assert_eq!(conflict.server_timestamp, now);
    }

    #[test]
    fn test_resolve_outcomes() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let conflict = resolver
            .detect_conflict(
                &make_change(now - Duration::seconds(1)),
                Some(&server_version(now)),
                now,
            )
            .unwrap();

        let client = resolver.resolve(&conflict, Resolution::ClientWins, None, now).unwrap();
        assert_eq!(client.resolved_data, Some(conflict.client_data.clone()));

        let server = resolver.resolve(&conflict, Resolution::ServerWins, None, now).unwrap();
        assert_eq!(server.resolved_data, Some(conflict.server_data.clone()));
        assert_eq!(server.status, ConflictStatus::Resolved);

        let merged = resolver
            .resolve(&conflict, Resolution::Merge, Some(json!({"usl": 11.0})), now)
            .unwrap();
        assert_eq!(merged.resolved_data, Some(json!({"usl": 11.0})));

        let missing = resolver.resolve(&conflict, Resolution::Merge, None, now);
        assert!(matches!(missing, Err(SyncError::InvalidArgument(_))));

        let again = resolver.resolve(&server, Resolution::ClientWins, None, now);
        assert!(matches!(again, Err(SyncError::InvalidState(_))));
    }

    #[test]
    fn test_newest_wins_prefers_server_on_tie() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let mut conflict = resolver
            .detect_conflict(
                &make_change(now - Duration::seconds(1)),
                Some(&server_version(now)),
                now,
            )
            .unwrap();

        assert_eq!(
            resolver.choose(&conflict, AutoResolveStrategy::NewestWins),
            Some(Resolution::ServerWins)
        );

        conflict.client_timestamp = conflict.server_timestamp;
        assert_eq!(
            resolver.choose(&conflict, AutoResolveStrategy::NewestWins),
            Some(Resolution::ServerWins)
        );

        conflict.client_timestamp = conflict.server_timestamp + Duration::seconds(1);
        assert_eq!(
            resolver.choose(&conflict, AutoResolveStrategy::NewestWins),
            Some(Resolution::ClientWins)
        );
        assert_eq!(resolver.choose(&conflict, AutoResolveStrategy::Manual), None);
    }
}
