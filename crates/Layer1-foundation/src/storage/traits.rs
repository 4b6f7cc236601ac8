//! TaskStore trait

use crate::task::{StatusUpdate, TaskId, TaskRecord};
use crate::Result;
use async_trait::async_trait;

/// Persistence for task records
///
/// Every backend reports a missing record as `Error::NotFound`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, id: &TaskId) -> Result<TaskRecord>;

    async fn insert_task(&self, record: TaskRecord) -> Result<()>;

    /// Apply a status update and return the stored record
    async fn update_task_status(&self, id: &TaskId, update: StatusUpdate) -> Result<TaskRecord>;
}
