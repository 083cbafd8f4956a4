//! One JSON file per run.
//!
//! Layout:
//! ```text
//! {dir}/{run_id}.json   latest snapshot
//! {dir}/{run_id}.lock   advisory lock taken by writers
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use futures::future::BoxFuture;
use tempfile::NamedTempFile;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::graph::GraphSnapshot;
use weft_core::traits::GraphStore;

use crate::{check_run_id, check_version};

/// File-system store.
///
/// Writers hold an exclusive lock on the run's lock file across the version
/// check and the write, so stores in different processes sharing a
/// directory still see each other's conflicts. Snapshots are written to a
/// unique temp file and renamed over the target.
pub struct JsonFileGraphStore {
    dir: PathBuf,
}

struct RunPaths {
    snapshot: PathBuf,
    lock: PathBuf,
}

impl JsonFileGraphStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            WeftError::Store(format!("failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths_for(&self, run_id: &str) -> Result<RunPaths> {
        check_run_id(run_id)?;
        Ok(RunPaths {
            snapshot: self.dir.join(format!("{}.json", run_id)),
            lock: self.dir.join(format!("{}.lock", run_id)),
        })
    }
}

fn read_snapshot(path: &Path) -> Result<Option<GraphSnapshot>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(WeftError::Store(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    let snapshot = serde_json::from_slice(&data).map_err(|e| {
        WeftError::Store(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(snapshot))
}

/// Run `f` while holding the exclusive lock on `lock_path`.
fn with_run_lock<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            WeftError::Store(format!("failed to open {}: {}", lock_path.display(), e))
        })?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write().map_err(|e| {
        WeftError::Store(format!("failed to lock {}: {}", lock_path.display(), e))
    })?;
    f()
}

fn atomic_write(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| WeftError::Store(format!("failed to create temp file: {}", e)))?;
    temp.write_all(data)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| WeftError::Store(format!("failed to write temp file: {}", e)))?;
    temp.persist(path)
        .map_err(|e| WeftError::Store(format!("failed to rename temp file: {}", e.error)))?;
    Ok(())
}

/// File locks block, so lock-holding work runs on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WeftError::Store(format!("snapshot task failed: {}", e)))?
}

impl GraphStore for JsonFileGraphStore {
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let prepared = self.paths_for(&snapshot.run_id).and_then(|paths| {
            let data = serde_json::to_vec_pretty(snapshot)?;
            Ok((paths, data, snapshot.run_id.clone(), snapshot.version))
        });
        let dir = self.dir.clone();
        Box::pin(async move {
            let (paths, data, run_id, version) = prepared?;
            blocking(move || {
                with_run_lock(&paths.lock, || {
                    let stored = read_snapshot(&paths.snapshot)?.map(|s| s.version);
                    check_version(&run_id, stored, version)?;
                    atomic_write(&dir, &paths.snapshot, &data)?;
                    debug!(run_id = %run_id, version, "snapshot written");
                    Ok(())
                })
            })
            .await
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<GraphSnapshot>> {
        let paths = self.paths_for(run_id);
        let run_id = run_id.to_string();
        Box::pin(async move {
            read_snapshot(&paths?.snapshot)?
                .ok_or_else(|| WeftError::NotFound(format!("run '{}'", run_id)))
        })
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let entries = std::fs::read_dir(&self.dir)
                .map_err(|e| WeftError::Store(format!("failed to list runs: {}", e)))?;
            let mut ids = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
            ids.sort();
            Ok(ids)
        })
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<bool>> {
        let paths = self.paths_for(run_id);
        Box::pin(async move {
            let paths = paths?;
            // The lock file stays behind; removing it would race with waiting writers.
            blocking(move || {
                with_run_lock(&paths.lock, || match std::fs::remove_file(&paths.snapshot) {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(WeftError::Store(format!("failed to delete run: {}", e))),
                })
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Barrier;
    use weft_core::graph::TaskGraph;
    use weft_core::task::TaskStatus;

    fn sample_graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        let root = graph.create_root(
            "research_manager",
            json!("What is vibe coding?"),
            Some("human".into()),
        );
        graph.set_status(root, TaskStatus::Running).unwrap();
        let child = graph
            .create_node("research_agent", json!({"request": "define it"}), Some(root))
            .unwrap();
        graph.block_on(root, child).unwrap();
        graph.bump_version();
        graph
    }

    #[tokio::test]
    async fn round_trip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileGraphStore::open(tmp.path().join("runs")).unwrap();
        let graph = sample_graph();

        store.save(&graph.to_snapshot("demo")).await.unwrap();
        let mut files: Vec<String> = std::fs::read_dir(tmp.path().join("runs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["demo.json", "demo.lock"]);

        let loaded = TaskGraph::from_snapshot(store.load("demo").await.unwrap()).unwrap();
        assert_eq!(loaded, graph);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileGraphStore::open(tmp.path()).unwrap();
        let mut graph = sample_graph();
        store.save(&graph.to_snapshot("demo")).await.unwrap();

        let stale = graph.to_snapshot("demo");
        graph.bump_version();
        store.save(&graph.to_snapshot("demo")).await.unwrap();

        assert!(matches!(
            store.save(&stale).await,
            Err(WeftError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileGraphStore::open(tmp.path()).unwrap();
        let graph = sample_graph();
        store.save(&graph.to_snapshot("b")).await.unwrap();
        store.save(&graph.to_snapshot("a")).await.unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.list_runs().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(matches!(store.load("a").await, Err(WeftError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_file_is_store_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileGraphStore::open(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{not json").unwrap();
        assert!(matches!(store.load("bad").await, Err(WeftError::Store(_))));
    }

    #[tokio::test]
    async fn unsafe_run_id_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileGraphStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.load("../escape").await,
            Err(WeftError::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_stores_on_one_dir_never_both_win() {
        let tmp = tempfile::tempdir().unwrap();
        let first = Arc::new(JsonFileGraphStore::open(tmp.path()).unwrap());
        let second = Arc::new(JsonFileGraphStore::open(tmp.path()).unwrap());

        for trial in 0..50 {
            let run_id = format!("race-{}", trial);
            let mut graph = sample_graph();
            first.save(&graph.to_snapshot(&run_id)).await.unwrap();
            graph.bump_version();
            let next = graph.to_snapshot(&run_id);

            let barrier = Arc::new(Barrier::new(2));
            let writers: Vec<_> = [first.clone(), second.clone()]
                .into_iter()
                .map(|store| {
                    let snapshot = next.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        store.save(&snapshot).await
                    })
                })
                .collect();

            let mut accepted = 0;
            let mut conflicts = 0;
            for writer in writers {
                match writer.await.unwrap() {
                    Ok(()) => accepted += 1,
                    Err(WeftError::Conflict { .. }) => conflicts += 1,
                    Err(e) => panic!("trial {}: {}", trial, e),
                }
            }
            assert_eq!((accepted, conflicts), (1, 1), "trial {}", trial);
            assert_eq!(second.load(&run_id).await.unwrap().version, next.version);
        }
    }
}
