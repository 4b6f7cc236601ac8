//! Event Bus - task event broadcast
//!
//! Async publish/subscribe with one broadcast channel per task, a global
//! channel, and registered listeners.

use super::types::TaskEvent;
use crate::task::TaskId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

// ============================================================================
// EventListener Trait
// ============================================================================

/// Event listener ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Implemented by components that want events pushed to them
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Listener name (for debugging)
    fn name(&self) -> &str;

    async fn on_event(&self, event: &TaskEvent);
}

// ============================================================================
// EventBus
// ============================================================================

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of each broadcast channel
    pub channel_capacity: usize,

    /// Number of events kept for late observers
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 256,
        }
    }
}

struct RegisteredListener {
    listener: Arc<dyn EventListener>,
    task: Option<TaskId>,
}

/// Task event bus
///
/// Publishing never fails: a channel without receivers simply drops the event.
pub struct EventBus {
    config: EventBusConfig,

    /// Global channel (every task)
    sender: broadcast::Sender<TaskEvent>,

    /// Per-task channels, created on first subscribe
    channels: RwLock<HashMap<TaskId, broadcast::Sender<TaskEvent>>>,

    listeners: RwLock<HashMap<ListenerId, RegisteredListener>>,
    listener_counter: AtomicU64,

    history: RwLock<VecDeque<TaskEvent>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);

        Self {
            config,
            sender,
            channels: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            listener_counter: AtomicU64::new(0),
            history: RwLock::new(VecDeque::new()),
            event_count: AtomicU64::new(0),
        }
    }

    /// Receive events for one task
    pub async fn subscribe(&self, task_id: TaskId) -> broadcast::Receiver<TaskEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .subscribe()
    }

    /// Receive events for every task
    pub fn receiver(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Register a listener, optionally limited to one task
    pub async fn register(
        &self,
        listener: Arc<dyn EventListener>,
        task: Option<TaskId>,
    ) -> ListenerId {
        let id = ListenerId(self.listener_counter.fetch_add(1, Ordering::SeqCst));

        debug!(
            listener_name = listener.name(),
            listener_id = %id,
            "Registering event listener"
        );

        let mut listeners = self.listeners.write().await;
        listeners.insert(id, RegisteredListener { listener, task });

        id
    }

    pub async fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().await.remove(&id).is_some();
        if removed {
            debug!(listener_id = %id, "Unregistered event listener");
        }
        removed
    }

    pub async fn publish(&self, event: TaskEvent) {
        let task_id = event.task_id();
        let count = self.event_count.fetch_add(1, Ordering::SeqCst) + 1;

        trace!(
            task_id = %task_id,
            kind = event.kind(),
            "Publishing event #{}", count
        );

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.config.history_size {
                history.pop_front();
            }
        }

        let _ = self.sender.send(event.clone());

        if let Some(channel) = self.channels.read().await.get(&task_id) {
            let _ = channel.send(event.clone());
        }

        // Listeners run without the lock held; they may register or unregister
        let targets: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .await
            .values()
            .filter(|registered| registered.task.map_or(true, |t| t == task_id))
            .map(|registered| Arc::clone(&registered.listener))
            .collect();
        for listener in targets {
            listener.on_event(&event).await;
        }
    }

    /// Drop the per-task channel; receivers see `Closed` once drained
    pub async fn close_task(&self, task_id: TaskId) {
        if self.channels.write().await.remove(&task_id).is_some() {
            debug!(task_id = %task_id, "Closed task event channel");
        }
    }

    /// Recent events for a task, oldest first
    pub async fn history_for(&self, task_id: TaskId) -> Vec<TaskEvent> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| e.task_id() == task_id)
            .cloned()
            .collect()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Total events published
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
