//! Per-run settings derived from `ConduitConfig`

use conduit_foundation::{ConduitConfig, SessionSettings};
use conduit_session::{PromptOptions, PromptPart, RequestOptions, SessionOptions};
use std::time::Duration;

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Sandbox image to start
    pub image: String,

    /// Health probe budget (N probes at most)
    pub health_check_retries: u32,

    pub health_check_interval: Duration,

    /// Hard deadline for the whole task
    pub task_timeout: Duration,

    pub session: SessionSettings,
}

impl RunSettings {
    pub fn from_config(config: &ConduitConfig) -> Self {
        Self {
            image: config.sandbox.image.clone(),
            health_check_retries: config.orchestrator.health_check_retries,
            health_check_interval: config.orchestrator.health_check_interval(),
            task_timeout: config.orchestrator.task_timeout(),
            session: config.session.clone(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_health_check(mut self, retries: u32, interval: Duration) -> Self {
        self.health_check_retries = retries;
        self.health_check_interval = interval;
        self
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            directory: self.session.directory.clone(),
        }
    }

    /// Session creation options; the title is the prefix plus the start of
    /// the instruction
    pub fn session_options(&self, instruction: &str) -> SessionOptions {
        let first_line = instruction.lines().next().unwrap_or_default().trim();
        let mut excerpt: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
        if first_line.chars().count() > TITLE_MAX_CHARS {
            excerpt.push_str("...");
        }
        let title = if self.session.title_prefix.is_empty() {
            excerpt
        } else {
            format!("{}: {}", self.session.title_prefix, excerpt)
        };

        SessionOptions {
            title: Some(title),
            request: self.request_options(),
        }
    }

    pub fn prompt_parts(&self, instruction: &str) -> Vec<PromptPart> {
        vec![PromptPart::text(instruction)]
    }

    pub fn prompt_options(&self) -> PromptOptions {
        PromptOptions {
            agent: self.session.agent.clone(),
            model: self.session.model.clone(),
            request: self.request_options(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&ConduitConfig::default())
    }
}
