use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use latch_core::error::{GraphError, Result};

use crate::store::{CheckpointStore, ThreadHead, WriteMode, check_write, conflict};
use crate::types::Checkpoint;

type ThreadMap = HashMap<String, Vec<Checkpoint>>;

/// In-memory checkpoint store for testing and short-lived workflows.
///
/// Thread-safe via `RwLock`. All data is lost when the store is dropped.
pub struct MemoryCheckpointStore {
    /// Map: thread_id → checkpoints in write order
    data: RwLock<ThreadMap>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ThreadMap>> {
        self.data
            .read()
            .map_err(|_| GraphError::StoreUnavailable("memory store lock poisoned".into()).into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ThreadMap>> {
        self.data
            .write()
            .map_err(|_| GraphError::StoreUnavailable("memory store lock poisoned".into()).into())
    }
}

impl MemoryCheckpointStore {
    /// Check and append under one write lock.
    fn insert(&self, checkpoint: Checkpoint, mode: WriteMode) -> Result<String> {
        let mut data = self.write()?;
        let thread = data.entry(checkpoint.thread_id.clone()).or_default();

        let head = ThreadHead {
            latest: thread.last().map(|cp| cp.id.as_str()),
            id_taken: thread.iter().any(|cp| cp.id == checkpoint.id),
            parent_known: checkpoint
                .parent_id
                .as_deref()
                .is_some_and(|parent| thread.iter().any(|cp| cp.id == parent)),
        };
        if let Err(reason) = check_write(&checkpoint, head, mode) {
            return Err(conflict(&checkpoint, reason));
        }

        let id = checkpoint.id.clone();
        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %id,
            ?mode,
            "checkpoint stored"
        );
        thread.push(checkpoint);
        Ok(id)
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<String> {
        self.insert(checkpoint, WriteMode::Append)
    }

    async fn put_fork(&self, checkpoint: Checkpoint) -> Result<String> {
        self.insert(checkpoint, WriteMode::Fork)
    }

    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let data = self.read()?;
        Ok(data
            .get(thread_id)
            .and_then(|thread| thread.iter().find(|cp| cp.id == checkpoint_id).cloned()))
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let data = self.read()?;
        Ok(data.get(thread_id).and_then(|thread| thread.last().cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let data = self.read()?;
        Ok(data.get(thread_id).cloned().unwrap_or_default())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut data = self.write()?;
        data.remove(thread_id);
        Ok(())
    }
}
