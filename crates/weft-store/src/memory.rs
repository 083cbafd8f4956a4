use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::graph::GraphSnapshot;
use weft_core::traits::GraphStore;

use crate::check_version;

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryGraphStore {
    runs: Mutex<HashMap<String, GraphSnapshot>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, GraphSnapshot>>> {
        self.runs
            .lock()
            .map_err(|e| WeftError::Store(format!("memory store poisoned: {}", e)))
    }
}

impl GraphStore for MemoryGraphStore {
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let mut runs = self.lock()?;
            let stored = runs.get(&snapshot.run_id).map(|s| s.version);
            check_version(&snapshot.run_id, stored, snapshot.version)?;
            runs.insert(snapshot.run_id.clone(), snapshot);
            Ok(())
        })
    }

    fn load(&self, run_id: &str) -> BoxFuture<'_, Result<GraphSnapshot>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            self.lock()?
                .get(&run_id)
                .cloned()
                .ok_or_else(|| WeftError::NotFound(format!("run '{}'", run_id)))
        })
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut ids: Vec<String> = self.lock()?.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn delete(&self, run_id: &str) -> BoxFuture<'_, Result<bool>> {
        let run_id = run_id.to_string();
        Box::pin(async move { Ok(self.lock()?.remove(&run_id).is_some()) })
    }
}
