//! libSQL checkpoint store.
//!
//! One row per thread: the serialized state JSON plus a few columns
//! (client, stage, transfer reason) for operators querying the file
//! directly. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::dialogue::{ConversationThread, STATE_VERSION};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::CheckpointStore;

/// libSQL checkpoint store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlCheckpointStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCheckpointStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Checkpoint database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Decode a stored state document, refusing layouts newer than this build.
fn decode_state(raw: &str) -> Result<ConversationThread, DatabaseError> {
    let thread: ConversationThread = serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("Invalid thread state: {e}")))?;
    if thread.version > STATE_VERSION {
        return Err(DatabaseError::Serialization(format!(
            "Thread {} has state version {} (max {STATE_VERSION})",
            thread.thread_id, thread.version
        )));
    }
    Ok(thread)
}

#[async_trait]
impl CheckpointStore for LibSqlCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationThread>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT state FROM threads WHERE thread_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get thread: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get thread row: {e}")))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get thread state: {e}")))?;
                decode_state(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, thread: &ConversationThread) -> Result<(), DatabaseError> {
        let state = serde_json::to_string(thread)
            .map_err(|e| DatabaseError::Serialization(format!("Encode thread state: {e}")))?;
        let transfer_reason = thread.transfer.as_ref().map(|t| t.reason.clone());

        self.conn
            .execute(
                "INSERT INTO threads
                    (thread_id, client_id, stage, state_version, state, transfer_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    stage = excluded.stage,
                    state_version = excluded.state_version,
                    state = excluded.state,
                    transfer_reason = excluded.transfer_reason,
                    updated_at = excluded.updated_at",
                params![
                    thread.thread_id.as_str(),
                    thread.client_id.as_str(),
                    thread.stage().to_string(),
                    i64::from(thread.version),
                    state,
                    transfer_reason,
                    thread.created_at.to_rfc3339(),
                    thread.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put thread: {e}")))?;

        debug!(thread_id = %thread.thread_id, stage = %thread.stage(), "Thread checkpointed");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM threads WHERE thread_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete thread: {e}")))?;
        Ok(affected > 0)
    }
}
