//! Layered config loading
//!
//! Later layers override earlier ones key by key; tables are merged, not replaced.

use super::ConduitConfig;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use toml::Value;
use tracing::debug;

/// Config file name
pub const CONDUIT_CONFIG_FILE: &str = "config.toml";

/// Collects config layers and produces a validated `ConduitConfig`
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    layers: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global (`<config_dir>/conduit/config.toml`) then project (`./.conduit/config.toml`)
    pub fn standard() -> Self {
        let mut loader = Self::new();
        if let Some(dir) = dirs::config_dir() {
            loader = loader.with_layer(dir.join("conduit").join(CONDUIT_CONFIG_FILE));
        }
        if let Ok(cwd) = std::env::current_dir() {
            loader = loader.with_layer(cwd.join(".conduit").join(CONDUIT_CONFIG_FILE));
        }
        loader
    }

    /// Add a layer; missing files are skipped at load time
    pub fn with_layer(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(path.into());
        self
    }

    /// Add a layer that must exist
    pub fn with_required(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Ok(self.with_layer(path))
    }

    pub fn load(&self) -> Result<ConduitConfig> {
        let mut merged = Value::Table(Default::default());

        for path in &self.layers {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let layer: Value = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), "Merging config layer");
            merge(&mut merged, layer);
        }

        let config: ConduitConfig = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
