//! # conduit-task
//!
//! Drives one agentic coding task from creation to a terminal state:
//! provision a sandbox, wait for it to become healthy, open a session,
//! submit the instruction, then follow the session's event stream until it
//! completes, fails, times out or is cancelled. The sandbox is released on
//! every exit path.
//!
//! ```text
//! provisioning -> health_check -> creating_session -> prompting -> running
//!                      ^  |                                          |
//!                      +--+ (bounded retries)                        v
//!                                            completed | failed | cancelled
//! ```
//!
//! One `TaskOrchestrator` runs per task as its own tokio task. Everything it
//! reacts to (start, health retries, stream events, cancel, deadline) arrives
//! through a single mailbox and is handled strictly in order.

pub mod classify;
pub mod message;
pub mod orchestrator;
pub mod phase;
pub mod registry;
pub mod run;
pub mod settings;

pub use classify::{classify, EventClass};
pub use message::Command;
pub use orchestrator::{OrchestratorDeps, OrchestratorHandle, TaskOrchestrator};
pub use phase::Phase;
pub use registry::TaskRegistry;
pub use run::TaskRun;
pub use settings::RunSettings;
