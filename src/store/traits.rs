//! `CheckpointStore`: the durable home of conversation threads.

use async_trait::async_trait;

use crate::dialogue::ConversationThread;
use crate::error::DatabaseError;

/// Key-value store for conversation state, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a thread. `Ok(None)` if it was never stored.
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationThread>, DatabaseError>;

    /// Insert or replace a thread.
    async fn put(&self, thread: &ConversationThread) -> Result<(), DatabaseError>;

    /// Remove a thread. Backends that cannot delete return `Ok(false)`.
    async fn delete(&self, _thread_id: &str) -> Result<bool, DatabaseError> {
        Ok(false)
    }
}
