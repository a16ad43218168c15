//! Database module for SQLite persistence
//!
//! Holds the server-side sync tables: entity versions, conflicts and history.

mod schema;

pub use schema::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;

/// Open the sync database and make sure its tables exist.
///
/// Versions, conflicts and history share one pool; writers to the same
/// entity are already serialized by the coordinator.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;
    tracing::info!(url = %database_url, "Sync database ready");

    Ok(pool)
}
