//! Task records as JSON files (`<dir>/<task-id>.json`)

use super::JsonStore;
use crate::storage::TaskStore;
use crate::task::{StatusUpdate, TaskId, TaskRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct JsonTaskStore {
    store: JsonStore,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
            write_lock: Mutex::new(()),
        }
    }

    fn filename(id: &TaskId) -> String {
        format!("{}.json", id)
    }

    fn load(&self, id: &TaskId) -> Result<TaskRecord> {
        self.store
            .load_optional(&Self::filename(id))?
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord> {
        self.load(id)
    }

    async fn insert_task(&self, record: TaskRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.save(&Self::filename(&record.id), &record)
    }

    async fn update_task_status(&self, id: &TaskId, update: StatusUpdate) -> Result<TaskRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(id)?;
        record.apply(&update);
        self.store.save(&Self::filename(id), &record)?;
        Ok(record)
    }
}
