//! Sync API endpoints
//!
//! Push, pull and conflict resolution for offline-capable clients. The
//! caller's identity comes from the `x-user-id` header; resolve and
//! auto-resolve take the acting device from `x-client-id`.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{
    AutoResolveRequest, Conflict, PullRequest, PullResponse, PushRequest, PushResponse,
    ResolveRequest, ResolveResponse, SyncContext, SyncHistoryRecord, SyncStats,
};

const USER_HEADER: &str = "x-user-id";
const CLIENT_HEADER: &str = "x-client-id";
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/push", post(push_changes))
        .route("/pull", post(pull_changes))
        .route("/conflicts", get(list_conflicts))
        .route("/conflicts/:id/resolve", post(resolve_conflict))
        .route("/conflicts/:id/auto-resolve", post(auto_resolve_conflict))
        .route("/history", get(sync_history))
        .route("/stats", get(sync_stats))
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn context(headers: &HeaderMap, client_id: Option<&str>) -> SyncContext {
    let user_id = header_or(headers, USER_HEADER, "anonymous");
    let client_id = match client_id {
        Some(id) => id.to_string(),
        None => header_or(headers, CLIENT_HEADER, "unknown"),
    };
    SyncContext::new(user_id, client_id)
}

/// Push local changes to server
async fn push_changes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    if req.client_id.trim().is_empty() {
        return Err(AppError::BadRequest("clientId is required".to_string()));
    }
    let ctx = context(&headers, Some(&req.client_id));
    let response = state.coordinator().push_changes(&ctx, req.changes).await?;
    Ok(Json(response))
}

/// Pull changes from server
async fn pull_changes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PullRequest>,
) -> Result<Json<PullResponse>> {
    let ctx = context(&headers, Some(&req.client_id));
    let response = state.coordinator().pull_changes(&ctx, &req).await?;
    Ok(Json(response))
}

/// List pending conflicts
async fn list_conflicts(State(state): State<AppState>) -> Result<Json<Vec<Conflict>>> {
    Ok(Json(state.coordinator().get_conflicts().await?))
}

async fn resolve_conflict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>> {
    let ctx = context(&headers, None);
    let response = state
        .coordinator()
        .resolve_conflict(&ctx, &id, req.resolution, req.merged_data)
        .await?;
    Ok(Json(response))
}

/// Resolve by policy; `manual` answers `null` and leaves the conflict pending
async fn auto_resolve_conflict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AutoResolveRequest>,
) -> Result<Json<Option<ResolveResponse>>> {
    let ctx = context(&headers, None);
    let response = state
        .coordinator()
        .auto_resolve(&ctx, &id, req.strategy)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn sync_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SyncHistoryRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.coordinator().history(limit).await?))
}

async fn sync_stats(State(state): State<AppState>) -> Result<Json<SyncStats>> {
    Ok(Json(state.coordinator().stats().await?))
}
