use async_trait::async_trait;

use latch_core::error::{GraphError, LatchError, Result};

use crate::types::Checkpoint;

/// Async storage backend for graph checkpoints.
///
/// Implementations must be thread-safe (`Send + Sync`) and allow concurrent
/// reads. Checkpoints are immutable and history is linear: both write
/// methods fail with `GraphError::CheckpointConflict` instead of overwriting
/// an id or silently forking a thread. The check and the insert happen
/// atomically, so writers racing from the same parent cannot both succeed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint and return its id.
    ///
    /// `parent_id` must be the thread's latest checkpoint, or `None` when the
    /// thread has no checkpoints yet.
    async fn put(&self, checkpoint: Checkpoint) -> Result<String>;

    /// Write a checkpoint that branches from an earlier one.
    ///
    /// `parent_id` may name any checkpoint of the thread. The new checkpoint
    /// becomes the latest.
    async fn put_fork(&self, checkpoint: Checkpoint) -> Result<String>;

    /// Retrieve a specific checkpoint by thread ID and checkpoint ID.
    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// Retrieve the most recently written checkpoint for a thread.
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// List all checkpoints for a thread in write order.
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete all checkpoints for a given thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

/// How a write relates to the thread's existing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Append,
    Fork,
}

/// What a store knows about the thread at the moment of a write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThreadHead<'a> {
    pub latest: Option<&'a str>,
    /// The new checkpoint's id is already used on this thread.
    pub id_taken: bool,
    /// The new checkpoint's parent exists on this thread.
    pub parent_known: bool,
}

/// Decide whether `checkpoint` may be written. Returns the conflict reason
/// otherwise.
pub(crate) fn check_write(
    checkpoint: &Checkpoint,
    head: ThreadHead<'_>,
    mode: WriteMode,
) -> std::result::Result<(), String> {
    if head.id_taken {
        return Err("checkpoint id already exists".into());
    }
    let parent = checkpoint.parent_id.as_deref();
    match mode {
        WriteMode::Append if parent != head.latest => Err(format!(
            "parent {} is not the latest checkpoint {}",
            describe(parent),
            describe(head.latest)
        )),
        WriteMode::Fork if parent.is_some() && !head.parent_known => {
            Err(format!("parent {} does not exist", describe(parent)))
        }
        _ => Ok(()),
    }
}

/// The error for a rejected write.
pub(crate) fn conflict(checkpoint: &Checkpoint, reason: String) -> LatchError {
    tracing::warn!(
        thread_id = %checkpoint.thread_id,
        checkpoint_id = %checkpoint.id,
        reason = %reason,
        "checkpoint write rejected"
    );
    GraphError::CheckpointConflict {
        thread_id: checkpoint.thread_id.clone(),
        checkpoint_id: checkpoint.id.clone(),
        reason,
    }
    .into()
}

fn describe(id: Option<&str>) -> String {
    match id {
        Some(id) => format!("'{id}'"),
        None => "(none)".into(),
    }
}
