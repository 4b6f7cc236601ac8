//! Process registry - at most one orchestrator per task id

use crate::orchestrator::{OrchestratorDeps, OrchestratorHandle, TaskOrchestrator};
use crate::phase::Phase;
use crate::settings::RunSettings;
use conduit_foundation::{Error, Result, TaskId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Entries = Arc<Mutex<HashMap<TaskId, OrchestratorHandle>>>;

/// Live orchestrators keyed by task id
///
/// Entries are removed by the worker itself when it exits, however it exits.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: Entries,
}

/// Removes a worker's entry when dropped (normal exit, panic or abort)
struct EntryGuard {
    entries: Entries,
    task_id: TaskId,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        lock(&self.entries).remove(&self.task_id);
        debug!(task_id = %self.task_id, "Orchestrator deregistered");
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<TaskId, OrchestratorHandle>> {
    // Map stays consistent even if a holder panicked
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an orchestrator for `task_id`
    ///
    /// Fails with `Error::AlreadyRunning` while one is live for that id.
    pub fn start(
        &self,
        task_id: TaskId,
        deps: OrchestratorDeps,
        settings: RunSettings,
    ) -> Result<OrchestratorHandle> {
        self.start_with_join(task_id, deps, settings)
            .map(|(handle, _)| handle)
    }

    /// Like `start`, also returning the worker's join handle
    pub fn start_with_join(
        &self,
        task_id: TaskId,
        deps: OrchestratorDeps,
        settings: RunSettings,
    ) -> Result<(OrchestratorHandle, JoinHandle<Phase>)> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&task_id) {
            return Err(Error::AlreadyRunning(task_id.to_string()));
        }

        let (orchestrator, handle) = TaskOrchestrator::new(task_id, deps, settings);
        entries.insert(task_id, handle.clone());

        let guard = EntryGuard {
            entries: Arc::clone(&self.entries),
            task_id,
        };
        let join = tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run().await
        });

        info!(task_id = %task_id, "Orchestrator registered");
        Ok((handle, join))
    }

    pub fn get(&self, task_id: &TaskId) -> Option<OrchestratorHandle> {
        lock(&self.entries).get(task_id).cloned()
    }

    /// Forward a cancel to a live orchestrator; false if none is running
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.get(task_id) {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        lock(&self.entries).contains_key(task_id)
    }

    /// Ids of live orchestrators
    pub fn running(&self) -> Vec<TaskId> {
        lock(&self.entries).keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("running", &self.len())
            .finish()
    }
}
