//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::StoreBackend;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub store: StoreBackend,
    /// Clients compare this against their own clock before pushing
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "spc-sync",
        store: state.config().sync.store,
        server_time: state.coordinator().server_time(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
