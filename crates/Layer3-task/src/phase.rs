//! Orchestrator phases

use conduit_foundation::TaskStatus;
use serde::{Deserialize, Serialize};

/// Position of a task in the orchestrator's state machine
///
/// Phases only move forward; `HealthCheck` may repeat while probes are
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the sandbox to start
    Provisioning,

    /// Polling the sandbox until its service answers
    HealthCheck,

    /// Opening a session inside the sandbox
    CreatingSession,

    /// Submitting the instruction
    Prompting,

    /// Following the session's event stream
    Running,

    /// The session went idle after doing work
    Completed,

    /// Failed with a human-readable reason
    Failed(String),

    /// Cancelled on request
    Cancelled,
}

impl Phase {
    /// Check if this is a terminal phase (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed(_) | Phase::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Phase::Completed)
    }

    /// Position in the forward ordering; terminal phases share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Provisioning => 0,
            Phase::HealthCheck => 1,
            Phase::CreatingSession => 2,
            Phase::Prompting => 3,
            Phase::Running => 4,
            Phase::Completed | Phase::Failed(_) | Phase::Cancelled => 5,
        }
    }

    /// Whether moving from `self` to `next` respects the forward ordering
    pub fn can_advance_to(&self, next: &Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        let (from, to) = (self.rank(), next.rank());
        to > from || (*self == Phase::HealthCheck && *next == Phase::HealthCheck)
    }

    /// Externally visible status while in this phase
    pub fn status(&self) -> TaskStatus {
        match self {
            Phase::Provisioning => TaskStatus::Pending,
            Phase::HealthCheck | Phase::CreatingSession | Phase::Prompting => TaskStatus::Starting,
            Phase::Running => TaskStatus::Running,
            Phase::Completed => TaskStatus::Completed,
            Phase::Failed(_) => TaskStatus::Failed,
            Phase::Cancelled => TaskStatus::Cancelled,
        }
    }

    /// Failure reason, if failed
    pub fn reason(&self) -> Option<&str> {
        match self {
            Phase::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Provisioning => "provisioning",
            Phase::HealthCheck => "health_check",
            Phase::CreatingSession => "creating_session",
            Phase::Prompting => "prompting",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Failed(_) => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Failed(reason) => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.display_name()),
        }
    }
}
