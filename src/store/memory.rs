//! In-process checkpoint store. Threads are lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::dialogue::ConversationThread;
use crate::error::DatabaseError;
use crate::store::traits::CheckpointStore;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, ConversationThread>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationThread>, DatabaseError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread: &ConversationThread) -> Result<(), DatabaseError> {
        self.threads
            .write()
            .await
            .insert(thread.thread_id.clone(), thread.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::Stage;

    #[tokio::test]
    async fn put_replaces_previous_state() {
        let store = InMemoryCheckpointStore::new();
        let mut thread = ConversationThread::new("t1", "u1", "300");
        store.put(&thread).await.unwrap();

        thread.active_stage = Some(Stage::Locator);
        store.put(&thread).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.active_stage, Some(Stage::Locator));
        assert_eq!(store.len().await, 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = InMemoryCheckpointStore::new();
        store
            .put(&ConversationThread::new("t1", "u1", "300"))
            .await
            .unwrap();
        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
    }
}
