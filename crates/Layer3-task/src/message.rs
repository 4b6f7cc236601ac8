//! Orchestrator mailbox messages

use conduit_session::StreamMessage;

/// Everything an orchestrator reacts to
///
/// Start, cancel, the deadline, the orchestrator's own follow-up steps and
/// stream traffic all share one queue, so they are handled in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Begin the lifecycle (queued once, at creation)
    Start,

    /// Probe sandbox health (first probe and each delayed retry)
    ProbeHealth,

    /// Open a session in the healthy sandbox
    CreateSession,

    /// Submit the instruction to the session
    SendPrompt,

    /// External cancel request
    Cancel,

    /// The task deadline elapsed
    DeadlineElapsed,

    /// Forwarded by the event stream unit
    Stream(StreamMessage),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::ProbeHealth => "probe_health",
            Command::CreateSession => "create_session",
            Command::SendPrompt => "send_prompt",
            Command::Cancel => "cancel",
            Command::DeadlineElapsed => "deadline_elapsed",
            Command::Stream(StreamMessage::Event(_)) => "stream_event",
            Command::Stream(StreamMessage::TransportError(_)) => "stream_error",
            Command::Stream(StreamMessage::Disconnected(_)) => "stream_disconnected",
        }
    }
}
