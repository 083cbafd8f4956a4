use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};

use weft_core::error::{Result, WeftError};
use weft_core::graph::GraphSnapshot;
use weft_core::traits::GraphStore;

use crate::check_version;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> WeftError + '_ {
    move |e| WeftError::Store(format!("{}: {}", context, e))
}

/// SQLite-backed store. One row per run holding the latest snapshot.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Store(format!("failed to create store directory: {}", e))
            })?;
        }
        let conn = Connection::open(path).map_err(db_err("failed to open graph store"))?;
        Self::init(conn)
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("failed to open graph store"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS task_graphs (
                 run_id TEXT PRIMARY KEY,
                 version INTEGER NOT NULL,
                 format_version INTEGER NOT NULL,
                 snapshot TEXT NOT NULL,
                 saved_at TEXT NOT NULL
             );",
        )
        .map_err(db_err("failed to initialize graph store schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WeftError::Store(format!("graph store poisoned: {}", e)))
    }

    fn save_sync(
        &self,
        run_id: &str,
        version: u64,
        format_version: u32,
        body: &str,
        saved_at: &str,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin transaction"))?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT version FROM task_graphs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("failed to read stored version"))?;
        check_version(run_id, stored.map(|v| v as u64), version)?;

        tx.execute(
            "INSERT INTO task_graphs (run_id, version, format_version, snapshot, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET
                 version = excluded.version,
                 format_version = excluded.format_version,
                 snapshot = excluded.snapshot,
                 saved_at = excluded.saved_at",
            params![run_id, version as i64, format_version, body, saved_at],
        )
        .map_err(db_err("failed to write snapshot"))?;

        tx.commit().map_err(db_err("failed to commit snapshot"))?;
        Ok(())
    }
}

impl GraphStore for SqliteGraphStore {
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let body = serde_json::to_string(snapshot);
        let run_id = snapshot.run_id.clone();
        let version = snapshot.version;
        let format_version = snapshot.format_version;
        let saved_at = snapshot.saved_at.to_rfc3339();
        Box::pin(async move {
            let body = body?;
            let result = self.save_sync(&run_id, version, format_version, &body, &saved_at);
            if let Err(WeftError::Store(ref message)) = result {
                tracing::error!(run_id = %run_id, error = %message, "snapshot save failed");
            }
            result
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<GraphSnapshot>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            let body: Option<String> = {
                let conn = self.lock()?;
                conn.query_row(
                    "SELECT snapshot FROM task_graphs WHERE run_id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("failed to load snapshot"))?
            };
            let body = body.ok_or_else(|| WeftError::NotFound(format!("run '{}'", run_id)))?;
            serde_json::from_str(&body)
                .map_err(|e| WeftError::Store(format!("corrupt snapshot for run {}: {}", run_id, e)))
        })
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT run_id FROM task_graphs ORDER BY run_id")
                .map_err(db_err("failed to prepare query"))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err("failed to list runs"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err("failed to read run id"))?;
            Ok(ids)
        })
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<bool>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let deleted = conn
                .execute("DELETE FROM task_graphs WHERE run_id = ?1", params![run_id])
                .map_err(db_err("failed to delete run"))?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::graph::TaskGraph;
    use weft_core::task::{FailureKind, TaskError, TaskStatus};

    fn forest() -> TaskGraph {
        let mut graph = TaskGraph::new();
        let root = graph.create_root("research_manager", json!("Tell me about ML"), None);
        graph.set_status(root, TaskStatus::Running).unwrap();
        let human = graph.create_node("human", json!("Pick A or B"), Some(root)).unwrap();
        graph.suspend_on(root, human).unwrap();
        let other = graph.create_root("approval_agent", json!("other"), None);
        graph
            .fail_task(other, TaskError::new(FailureKind::AgentResponse, "garbled"))
            .unwrap();
        graph.bump_version();
        graph
    }

    #[tokio::test]
    async fn round_trip_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runs.db");
        let graph = forest();
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store.save(&graph.to_snapshot("run-1")).await.unwrap();
        }

        let store = SqliteGraphStore::open(&path).unwrap();
        let loaded = TaskGraph::from_snapshot(store.load("run-1").await.unwrap()).unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(loaded.pending_human().len(), 1);
    }

    #[tokio::test]
    async fn version_conflict_leaves_row_untouched() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let mut graph = forest();
        store.save(&graph.to_snapshot("run")).await.unwrap();

        graph.bump_version();
        store.save(&graph.to_snapshot("run")).await.unwrap();

        let mut stale = graph.to_snapshot("run");
        stale.version = 1;
        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            WeftError::Conflict { expected: 3, found: 1, .. }
        ));
        assert_eq!(store.load("run").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let graph = forest();
        store.save(&graph.to_snapshot("b")).await.unwrap();
        store.save(&graph.to_snapshot("a")).await.unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("b").await.unwrap());
        assert!(!store.delete("b").await.unwrap());
        assert!(matches!(store.load("b").await, Err(WeftError::NotFound(_))));
    }
}
