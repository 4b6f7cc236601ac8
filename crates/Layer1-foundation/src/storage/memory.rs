//! In-memory task store

use super::TaskStore;
use crate::task::{StatusUpdate, TaskId, TaskRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a record (simulates deletion by another component)
    pub async fn remove(&self, id: &TaskId) -> Option<TaskRecord> {
        self.tasks.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))
    }

    async fn insert_task(&self, record: TaskRecord) -> Result<()> {
        self.tasks.write().await.insert(record.id, record);
        Ok(())
    }

    async fn update_task_status(&self, id: &TaskId, update: StatusUpdate) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        record.apply(&update);
        Ok(record.clone())
    }
}
