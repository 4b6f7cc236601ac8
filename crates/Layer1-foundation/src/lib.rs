//! # conduit-foundation
//!
//! Foundation layer for Conduit:
//! - Error: the shared `Error` / `Result`
//! - Task: task ids, persisted records, status updates
//! - Config: layered TOML configuration (`ConduitConfig`)
//! - Event: task event bus for external observers
//! - Storage: the `TaskStore` seam with in-memory, JSON and SQLite backends
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  Layer4  conduit-cli                                  │
//! │  Layer3  conduit-task      (orchestrator, registry)   │
//! │  Layer2  conduit-sandbox   conduit-session            │
//! │  Layer1  conduit-foundation                           │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod storage;
pub mod task;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Task records
// ============================================================================
pub use task::{StatusUpdate, TaskId, TaskRecord, TaskStatus};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    ConduitConfig, ConfigLoader, ModelRef, OrchestratorSettings, SandboxSettings,
    SessionSettings, StorageBackend, StorageSettings, CONDUIT_CONFIG_FILE,
};

// ============================================================================
// Event
// ============================================================================
pub use event::{EventBus, EventBusConfig, EventListener, ListenerId, TaskEvent};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{
    open_task_store, InMemoryTaskStore, JsonStore, JsonTaskStore, SqliteTaskStore, TaskStore,
};
