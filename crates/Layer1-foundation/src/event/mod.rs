//! Event System - task notifications for external observers
//!
//! The orchestrator publishes; UIs, the CLI and tests subscribe.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        EventBus                          │
//! │   publish(TaskEvent)                                     │
//! │       │                                                  │
//! │       ├──► per-task channel   subscribe(task_id)         │
//! │       ├──► global channel     receiver()                 │
//! │       └──► listeners          register(listener, filter) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe(task_id).await;
//!
//! bus.publish(TaskEvent::status(task_id, TaskStatus::Running)).await;
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}", event.kind());
//! }
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventListener, ListenerId};
pub use types::TaskEvent;
