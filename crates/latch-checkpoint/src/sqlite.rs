use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::de::DeserializeOwned;

use latch_core::error::{GraphError, Result};

use crate::store::{CheckpointStore, ThreadHead, WriteMode, check_write, conflict};
use crate::types::Checkpoint;

const SELECT_COLUMNS: &str = "SELECT id, thread_id, parent_id, step, channel_values, tasks, \
     metadata, created_at FROM checkpoints";

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed checkpoint store for durable persistence.
///
/// Thread-safe via `Arc<Mutex<Connection>>`. Writes run in `BEGIN IMMEDIATE`
/// transactions, so the parent check also holds across processes sharing
/// one database file. All SQLite operations are dispatched to a blocking
/// thread via `tokio::task::spawn_blocking`.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "failed to open checkpoint database"
            );
            GraphError::StoreUnavailable(format!("failed to open database: {e}"))
        })?;
        tracing::info!(path = %path.display(), "opened checkpoint database");
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            GraphError::StoreUnavailable(format!("failed to open in-memory db: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| GraphError::StoreUnavailable(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                parent_id TEXT,
                step INTEGER NOT NULL,
                channel_values TEXT NOT NULL,
                tasks TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (thread_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_thread
                ON checkpoints(thread_id, seq);",
        )
        .map_err(|e| GraphError::StoreUnavailable(format!("failed to create table: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| GraphError::StoreUnavailable(format!("spawn_blocking: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| GraphError::StoreUnavailable("sqlite connection lock poisoned".into()).into())
}

fn decode<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let step: i64 = row.get(3)?;
    let channel_values: String = row.get(4)?;
    let tasks: String = row.get(5)?;
    let metadata: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let created_at: DateTime<Utc> = created_at
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(Checkpoint {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        parent_id: row.get(2)?,
        step: step as usize,
        channel_values: decode(4, &channel_values)?,
        tasks: decode(5, &tasks)?,
        metadata: decode(6, &metadata)?,
        created_at,
    })
}

fn query_err(context: &str, e: rusqlite::Error) -> GraphError {
    tracing::error!(error = %e, "sqlite {context} failed");
    GraphError::StoreUnavailable(format!("{context}: {e}"))
}

fn id_exists(conn: &Connection, thread_id: &str, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM checkpoints WHERE thread_id = ?1 AND id = ?2)",
        params![thread_id, id],
        |row| row.get(0),
    )
}

fn latest_id(conn: &Connection, thread_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1",
        params![thread_id],
        |row| row.get(0),
    )
    .optional()
}

/// Check the thread head and insert inside one immediate transaction.
fn insert(conn: &mut Connection, checkpoint: Checkpoint, mode: WriteMode) -> Result<String> {
    let channel_values = serde_json::to_string(&checkpoint.channel_values)?;
    let tasks = serde_json::to_string(&checkpoint.tasks)?;
    let metadata = serde_json::to_string(&checkpoint.metadata)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| query_err("begin", e))?;

    let latest = latest_id(&tx, &checkpoint.thread_id).map_err(|e| query_err("query", e))?;
    let id_taken =
        id_exists(&tx, &checkpoint.thread_id, &checkpoint.id).map_err(|e| query_err("query", e))?;
    let parent_known = match &checkpoint.parent_id {
        Some(parent) => {
            id_exists(&tx, &checkpoint.thread_id, parent).map_err(|e| query_err("query", e))?
        }
        None => false,
    };
    let head = ThreadHead {
        latest: latest.as_deref(),
        id_taken,
        parent_known,
    };
    if let Err(reason) = check_write(&checkpoint, head, mode) {
        // Dropping `tx` rolls back.
        return Err(conflict(&checkpoint, reason));
    }

    tx.execute(
        "INSERT INTO checkpoints
            (id, thread_id, parent_id, step, channel_values, tasks, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            checkpoint.id,
            checkpoint.thread_id,
            checkpoint.parent_id,
            checkpoint.step as i64,
            channel_values,
            tasks,
            metadata,
            checkpoint.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| query_err("insert checkpoint", e))?;
    tx.commit().map_err(|e| query_err("commit", e))?;

    tracing::debug!(
        thread_id = %checkpoint.thread_id,
        checkpoint_id = %checkpoint.id,
        ?mode,
        "checkpoint stored"
    );
    Ok(checkpoint.id)
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<String> {
        self.blocking(move |conn| insert(conn, checkpoint, WriteMode::Append))
            .await
    }

    async fn put_fork(&self, checkpoint: Checkpoint) -> Result<String> {
        self.blocking(move |conn| insert(conn, checkpoint, WriteMode::Fork))
            .await
    }

    async fn get(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        let checkpoint_id = checkpoint_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE thread_id = ?1 AND id = ?2"),
                params![thread_id, checkpoint_id],
                row_to_checkpoint,
            )
            .optional()
            .map_err(|e| query_err("query", e).into())
        })
        .await
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1"),
                params![thread_id],
                row_to_checkpoint,
            )
            .optional()
            .map_err(|e| query_err("query", e).into())
        })
        .await
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} WHERE thread_id = ?1 ORDER BY seq ASC"))
                .map_err(|e| query_err("prepare", e))?;
            let rows = stmt
                .query_map(params![thread_id], row_to_checkpoint)
                .map_err(|e| query_err("query", e))?;

            let mut checkpoints = Vec::new();
            for row in rows {
                checkpoints.push(row.map_err(|e| query_err("read row", e))?);
            }
            Ok(checkpoints)
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let thread_id = thread_id.to_owned();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])
                .map_err(|e| query_err("delete", e))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Interrupt;
    use crate::types::{CheckpointMetadata, TaskRecord, TaskStatus};
    use latch_core::error::LatchError;
    use serde_json::json;
    use std::collections::HashMap;

    fn make_checkpoint(id: &str, thread_id: &str, step: usize) -> Checkpoint {
        child_of(None, id, thread_id, step)
    }

    fn child_of(parent: Option<&str>, id: &str, thread_id: &str, step: usize) -> Checkpoint {
        Checkpoint {
            id: id.into(),
            thread_id: thread_id.into(),
            parent_id: parent.map(String::from),
            step,
            channel_values: HashMap::from([("count".into(), json!(step))]),
            tasks: vec![],
            metadata: CheckpointMetadata {
                source: "loop".into(),
                step,
                run_id: Some("run-1".into()),
                extra: HashMap::new(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();

        let retrieved = store.get("thread-1", "cp-0").await.unwrap().unwrap();
        assert_eq!(retrieved.id, "cp-0");
        assert_eq!(retrieved.thread_id, "thread-1");
        assert_eq!(retrieved.step, 0);
        assert!(retrieved.parent_id.is_none());
        assert_eq!(retrieved.metadata.run_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.get("no-thread", "no-cp").await.unwrap().is_none());
        assert!(store.get_latest("no-thread").await.unwrap().is_none());
        assert!(store.list("no-thread").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_is_last_written() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-1", "thread-1", 1)).await.unwrap();
        store.put(child_of(Some("cp-1"), "cp-2", "thread-1", 2)).await.unwrap();
        store.put(child_of(Some("cp-2"), "cp-1b", "thread-1", 1)).await.unwrap();

        let latest = store.get_latest("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.id, "cp-1b");

        let ids: Vec<_> = store
            .list("thread-1")
            .await
            .unwrap()
            .into_iter()
            .map(|cp| cp.id)
            .collect();
        assert_eq!(ids, vec!["cp-1", "cp-2", "cp-1b"]);
    }

    #[tokio::test]
    async fn separate_threads_and_delete() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-a", "thread-a", 0)).await.unwrap();
        store.put(make_checkpoint("cp-b", "thread-b", 0)).await.unwrap();

        assert!(store.get("thread-a", "cp-b").await.unwrap().is_none());

        store.delete_thread("thread-a").await.unwrap();
        assert!(store.get_latest("thread-a").await.unwrap().is_none());
        assert!(store.get("thread-b", "cp-b").await.unwrap().is_some());
        store.delete_thread("nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();
        let err = store
            .put(make_checkpoint("cp-0", "thread-1", 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LatchError::Graph(GraphError::CheckpointConflict { .. })
        ));
        // Same id on another thread is fine.
        store.put(make_checkpoint("cp-0", "thread-2", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn tasks_roundtrip() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let mut cp = make_checkpoint("cp-0", "thread-1", 1);
        let mut done = TaskRecord::new("t1", "map_node", "push:s:map_node:0", json!({"item": "a"}));
        done.status = TaskStatus::Completed {
            writes: json!({"processed": ["processed_a_auto"]}),
        };
        let mut blocked =
            TaskRecord::new("t2", "map_node", "push:s:map_node:1", json!({"item": "b"}));
        blocked.status = TaskStatus::Interrupted {
            interrupts: vec![Interrupt {
                id: "i-1".into(),
                value: json!({"processing": "b"}),
                task_id: "t2".into(),
                node: "map_node".into(),
                step: 1,
                occurrence: 0,
            }],
        };
        cp.tasks = vec![done, blocked];
        store.put(cp.clone()).await.unwrap();

        let retrieved = store.get("thread-1", "cp-0").await.unwrap().unwrap();
        assert_eq!(retrieved.tasks, cp.tasks);
        assert_eq!(retrieved.interrupts()[0].id, "i-1");
    }

    #[tokio::test]
    async fn reopening_a_file_keeps_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");

        {
            let store = SqliteCheckpointStore::new(&path).unwrap();
            store.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();
        }

        let store = SqliteCheckpointStore::new(&path).unwrap();
        let latest = store.get_latest("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.id, "cp-0");
        assert_eq!(latest.channel_values["count"], json!(0));
    }

    #[tokio::test]
    async fn stale_parent_is_rejected_and_rolled_back() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();
        store.put(child_of(Some("cp-0"), "cp-1", "thread-1", 1)).await.unwrap();

        let err = store
            .put(child_of(Some("cp-0"), "cp-1b", "thread-1", 1))
            .await
            .unwrap_err();
        match err {
            LatchError::Graph(GraphError::CheckpointConflict { reason, .. }) => {
                assert!(reason.contains("not the latest"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_latest("thread-1").await.unwrap().unwrap().id, "cp-1");
        assert!(store.get("thread-1", "cp-1b").await.unwrap().is_none());

        // The connection is usable again after the rolled-back transaction.
        store.put(child_of(Some("cp-1"), "cp-2", "thread-1", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn fork_from_earlier_checkpoint() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();
        store.put(child_of(Some("cp-0"), "cp-1", "thread-1", 1)).await.unwrap();
        store
            .put_fork(child_of(Some("cp-0"), "cp-1b", "thread-1", 1))
            .await
            .unwrap();
        assert_eq!(store.get_latest("thread-1").await.unwrap().unwrap().id, "cp-1b");
        assert!(
            store
                .put_fork(child_of(Some("nope"), "cp-9", "thread-1", 9))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn two_connections_on_one_file_cannot_both_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let first = SqliteCheckpointStore::new(&path).unwrap();
        let second = SqliteCheckpointStore::new(&path).unwrap();
        first.put(make_checkpoint("cp-0", "thread-1", 0)).await.unwrap();

        let (a, b) = tokio::join!(
            first.put(child_of(Some("cp-0"), "cp-a", "thread-1", 1)),
            second.put(child_of(Some("cp-0"), "cp-b", "thread-1", 1)),
        );
        assert!(a.is_ok() ^ b.is_ok(), "exactly one writer wins");
        assert_eq!(first.list("thread-1").await.unwrap().len(), 2);
    }
}
