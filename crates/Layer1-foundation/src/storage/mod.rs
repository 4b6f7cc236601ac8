//! Storage module for Conduit
//!
//! - `TaskStore`: the persistence seam used by the orchestrator
//! - `memory`: in-process store (tests, embedding)
//! - `json`: one JSON file per task
//! - `db`: SQLite

mod db;
mod json;
mod memory;
mod traits;

pub use db::SqliteTaskStore;
pub use json::{JsonStore, JsonTaskStore};
pub use memory::InMemoryTaskStore;
pub use traits::TaskStore;

use crate::config::{StorageBackend, StorageSettings};
use crate::Result;
use std::sync::Arc;

/// Open the configured backend
pub fn open_task_store(settings: &StorageSettings) -> Result<Arc<dyn TaskStore>> {
    let dir = settings.resolve_data_dir()?;
    Ok(match settings.backend {
        StorageBackend::Json => Arc::new(JsonTaskStore::new(dir.join("tasks"))),
        StorageBackend::Sqlite => Arc::new(SqliteTaskStore::open(&dir)?),
    })
}
