//! Request and response types

use conduit_foundation::ModelRef;
use serde::{Deserialize, Serialize};

/// Options sent with every call that accepts them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Working directory inside the sandbox (`?directory=`)
    pub directory: Option<String>,
}

impl RequestOptions {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        self.directory
            .iter()
            .map(|d| ("directory", d.clone()))
            .collect()
    }
}

/// Options for session creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub title: Option<String>,
    pub request: RequestOptions,
}

/// A created session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One part of a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Options for prompt submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub agent: Option<String>,
    pub model: Option<ModelRef>,
    pub request: RequestOptions,
}

/// Answer to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Once,
    Always,
    Reject,
}

impl PermissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Reject => "reject",
        }
    }
}
