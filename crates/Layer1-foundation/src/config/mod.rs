//! Configuration module
//!
//! - `conduit`: the unified `ConduitConfig` and its sections
//! - `loader`: layered TOML loading (defaults → global → project → explicit)

mod conduit;
mod loader;

pub use conduit::{
    ConduitConfig, ModelRef, OrchestratorSettings, SandboxSettings, SessionSettings,
    StorageBackend, StorageSettings,
};
pub use loader::{ConfigLoader, CONDUIT_CONFIG_FILE};
