pub mod json;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use weft_core::config::{StoreBackend, StoreConfig};
use weft_core::error::{Result, WeftError};
use weft_core::traits::GraphStore;

pub use json::JsonFileGraphStore;
pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;

/// Open the backend named in the store config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryGraphStore::new()),
        StoreBackend::Json => Arc::new(JsonFileGraphStore::open(config.resolved_path())?),
        StoreBackend::Sqlite => Arc::new(SqliteGraphStore::open(&config.resolved_path())?),
    };
    tracing::debug!(backend = ?config.backend, "graph store opened");
    Ok(store)
}

/// Optimistic concurrency check shared by every backend.
///
/// A new run accepts any version; an existing run only accepts the version
/// directly after the stored one.
pub(crate) fn check_version(run_id: &str, stored: Option<u64>, incoming: u64) -> Result<()> {
    match stored {
        Some(current) if incoming != current + 1 => Err(WeftError::Conflict {
            run_id: run_id.to_string(),
            expected: current + 1,
            found: incoming,
        }),
        _ => Ok(()),
    }
}

/// Run ids double as file names, so keep them to a safe alphabet.
pub(crate) fn check_run_id(run_id: &str) -> Result<()> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(WeftError::Validation(format!("invalid run id '{}'", run_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_must_follow_stored() {
        assert!(check_version("r", None, 7).is_ok());
        assert!(check_version("r", Some(3), 4).is_ok());
        assert!(matches!(
            check_version("r", Some(3), 3),
            Err(WeftError::Conflict { expected: 4, found: 3, .. })
        ));
        assert!(check_version("r", Some(3), 9).is_err());
    }

    #[test]
    fn run_ids_are_path_safe() {
        assert!(check_run_id("demo-1").is_ok());
        assert!(check_run_id("3f2b_x.y").is_ok());
        assert!(check_run_id("").is_err());
        assert!(check_run_id("../etc").is_err());
        assert!(check_run_id("a/b").is_err());
        assert!(check_run_id(".hidden").is_err());
    }

    #[test]
    fn memory_backend_opens_without_path() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            path: None,
        };
        assert!(open_store(&config).is_ok());
    }
}
