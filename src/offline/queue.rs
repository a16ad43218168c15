//! Durable mutation queue
//!
//! Writes that fail for lack of connectivity are stored here and replayed
//! later, strictly in enqueue order. Replay stops at the first entry that
//! still cannot be delivered so dependent writes are never reordered.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::request::FetchRequest;
use super::transport::Fetcher;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt queue entry {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// A write waiting to be sent again
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation {
    /// Assigned by the store, strictly increasing
    pub id: i64,
    pub url: Url,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMutation {
    pub fn to_request(&self) -> FetchRequest {
        FetchRequest {
            headers: self.headers.clone(),
            body: self.body.clone(),
            ..FetchRequest::new(self.method.clone(), self.url.clone())
        }
    }
}

/// Durable backing for the queue.
///
/// `list` returns entries in enqueue order. Entries are never updated, only
/// appended and removed.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn append(
        &self,
        request: &FetchRequest,
        enqueued_at: DateTime<Utc>,
    ) -> Result<i64, QueueError>;

    async fn list(&self) -> Result<Vec<QueuedMutation>, QueueError>;

    async fn remove(&self, id: i64) -> Result<bool, QueueError>;

    async fn count(&self) -> Result<u64, QueueError>;
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<MemoryQueue>,
}

#[derive(Default)]
struct MemoryQueue {
    next_id: i64,
    entries: Vec<QueuedMutation>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStore {
    async fn append(
        &self,
        request: &FetchRequest,
        enqueued_at: DateTime<Utc>,
    ) -> Result<i64, QueueError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push(QueuedMutation {
            id,
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            enqueued_at,
        });
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        Ok(self.inner.lock().entries.clone())
    }

    async fn remove(&self, id: i64) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|m| m.id != id);
        Ok(inner.entries.len() != before)
    }

    async fn count(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().entries.len() as u64)
    }
}

// ============================================================================
// SQLite storage
// ============================================================================

const QUEUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queued_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;

/// Queue persisted in its own SQLite database.
///
/// Every operation runs in a transaction that is committed on success and
/// rolled back when dropped on any early return.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, QueueError> {
        sqlx::query(QUEUE_SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct QueuedRow {
    id: i64,
    url: String,
    method: String,
    headers: String,
    body: Vec<u8>,
    enqueued_at: String,
}

impl QueuedRow {
    fn into_mutation(self) -> Result<QueuedMutation, QueueError> {
        let id = self.id;
        let corrupt = |reason: String| QueueError::Corrupt { id, reason };

        Ok(QueuedMutation {
            id,
            url: Url::parse(&self.url).map_err(|e| corrupt(e.to_string()))?,
            method: Method::from_bytes(self.method.as_bytes())
                .map_err(|e| corrupt(e.to_string()))?,
            headers: serde_json::from_str(&self.headers)?,
            body: Bytes::from(self.body),
            enqueued_at: DateTime::parse_from_rfc3339(&self.enqueued_at)
                .map_err(|e| corrupt(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl QueueStorage for SqliteQueueStore {
    async fn append(
        &self,
        request: &FetchRequest,
        enqueued_at: DateTime<Utc>,
    ) -> Result<i64, QueueError> {
        let headers = serde_json::to_string(&request.headers)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO queued_mutations (url, method, headers, body, enqueued_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.url.as_str())
        .bind(request.method.as_str())
        .bind(&headers)
        .bind(request.body.as_ref())
        .bind(enqueued_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.last_insert_rowid())
    }

    async fn list(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, QueuedRow>(
            r#"
            SELECT id, url, method, headers, body, enqueued_at
            FROM queued_mutations
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.into_iter().map(QueuedRow::into_mutation).collect()
    }

    async fn remove(&self, id: i64) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM queued_mutations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, QueueError> {
        let mut tx = self.pool.begin().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queued_mutations")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(count as u64)
    }
}

// ============================================================================
// Queue and replay
// ============================================================================

/// What asked for a replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayTrigger {
    ConnectivityRestored,
    Periodic,
    Manual,
    /// Tag-identified background sync
    Background(String),
}

impl ReplayTrigger {
    pub fn tag(&self) -> &str {
        match self {
            ReplayTrigger::ConnectivityRestored => "connectivity-restored",
            ReplayTrigger::Periodic => "periodic",
            ReplayTrigger::Manual => "manual",
            ReplayTrigger::Background(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Another replay was already running
    Skipped,
    /// Every queued entry was delivered
    Completed { replayed: usize },
    /// Delivery failed at `failed_id`; it and everything after it remain
    Stopped {
        replayed: usize,
        failed_id: i64,
        error: String,
    },
    /// The queue could not be read
    Unavailable(String),
}

/// Snapshot of the queue for status displays
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub online: bool,
    pub replaying: bool,
    pub pending: u64,
    #[serde(rename = "lastReplayAt", skip_serializing_if = "Option::is_none")]
    pub last_replay_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Writes the server will never accept as sent; resending cannot help
fn is_rejected(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY
}

pub struct MutationQueue {
    storage: Arc<dyn QueueStorage>,
    fetcher: Arc<dyn Fetcher>,
    replay_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<QueueStatus>,
}

impl MutationQueue {
    pub fn new(storage: Arc<dyn QueueStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let (status, _) = watch::channel(QueueStatus {
            online: true,
            ..QueueStatus::default()
        });
        Self {
            storage,
            fetcher,
            replay_lock: tokio::sync::Mutex::new(()),
            status,
        }
    }

    /// Persist a failed write. The error only reports whether storing it
    /// worked; the first network failure is not repeated here.
    pub async fn enqueue(&self, request: &FetchRequest) -> Result<i64, QueueError> {
        let id = self.storage.append(request, Utc::now()).await?;
        tracing::info!(
            id = id,
            method = %request.method,
            url = %request.url,
            "Queued mutation for replay"
        );
        self.refresh_pending().await;
        Ok(id)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        self.storage.list().await
    }

    pub fn status(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.online != online;
            s.online = online;
            changed
        });
    }

    /// Send queued writes in order, stopping at the first failure.
    ///
    /// Only one replay runs at a time; a call made while one is in flight
    /// returns `Skipped` immediately.
    pub async fn replay(&self, trigger: ReplayTrigger) -> ReplayOutcome {
        let Ok(_guard) = self.replay_lock.try_lock() else {
            tracing::debug!(trigger = trigger.tag(), "Replay already running, skipping");
            return ReplayOutcome::Skipped;
        };

        self.status.send_modify(|s| s.replaying = true);
        let outcome = self.replay_entries(&trigger).await;

        let pending = self.storage.count().await.ok();
        self.status.send_modify(|s| {
            s.replaying = false;
            s.last_replay_at = Some(Utc::now());
            if let Some(pending) = pending {
                s.pending = pending;
            }
            s.last_error = match &outcome {
                ReplayOutcome::Stopped { error, .. } | ReplayOutcome::Unavailable(error) => {
                    Some(error.clone())
                }
                _ => None,
            };
        });

        outcome
    }

    async fn replay_entries(&self, trigger: &ReplayTrigger) -> ReplayOutcome {
        let entries = match self.storage.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(trigger = trigger.tag(), "Failed to read mutation queue: {}", e);
                return ReplayOutcome::Unavailable(e.to_string());
            }
        };
        if entries.is_empty() {
            return ReplayOutcome::Completed { replayed: 0 };
        }

        tracing::info!(
            trigger = trigger.tag(),
            count = entries.len(),
            "Replaying queued mutations"
        );

        let mut replayed = 0;
        for entry in entries {
            let failure = match self.fetcher.fetch(&entry.to_request()).await {
                Ok(response) if response.is_success() => None,
                Ok(response) if is_rejected(response.status) => {
                    tracing::warn!(
                        id = entry.id,
                        status = %response.status,
                        url = %entry.url,
                        "Queued mutation rejected by server, dropping"
                    );
                    None
                }
                Ok(response) => Some(format!("server responded {}", response.status)),
                Err(e) => Some(e.to_string()),
            };

            if let Some(error) = failure {
                tracing::warn!(
                    id = entry.id,
                    replayed = replayed,
                    "Replay stopped: {}",
                    error
                );
                return ReplayOutcome::Stopped {
                    replayed,
                    failed_id: entry.id,
                    error,
                };
            }

            if let Err(e) = self.storage.remove(entry.id).await {
                // Leaving it would resend an already delivered write later
                tracing::error!(id = entry.id, "Failed to remove replayed mutation: {}", e);
                return ReplayOutcome::Stopped {
                    replayed,
                    failed_id: entry.id,
                    error: e.to_string(),
                };
            }
            replayed += 1;
        }

        tracing::info!(replayed = replayed, "Mutation queue drained");
        ReplayOutcome::Completed { replayed }
    }

    /// Replay on a fixed interval while online with entries pending
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !self.status().online {
                    continue;
                }
                // Storage is the source of truth; entries may predate this process
                self.refresh_pending().await;
                if self.status().pending > 0 {
                    self.replay(ReplayTrigger::Periodic).await;
                }
            }
        })
    }

    /// Re-read the pending count from storage and publish it
    pub async fn refresh_pending(&self) {
        match self.storage.count().await {
            Ok(pending) => self.status.send_modify(|s| s.pending = pending),
            Err(e) => tracing::warn!("Failed to count queued mutations: {}", e),
        }
    }
}
