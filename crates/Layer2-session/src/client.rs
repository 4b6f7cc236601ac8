//! Session client trait and the stream subscription handle

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::event::StreamMessage;
use crate::types::{
    PermissionDecision, PromptOptions, PromptPart, RequestOptions, SessionInfo, SessionOptions,
};

/// Destination for stream messages
///
/// Wraps the owner's mailbox so stream messages land in the same queue as
/// its other messages.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(StreamMessage) -> bool + Send + Sync>,
}

impl EventSink {
    /// Deliver into `tx`, wrapping each message with `wrap`
    pub fn from_sender<M: Send + 'static>(
        tx: mpsc::UnboundedSender<M>,
        wrap: fn(StreamMessage) -> M,
    ) -> Self {
        Self {
            deliver: Arc::new(move |msg| tx.send(wrap(msg)).is_ok()),
        }
    }

    /// Returns false once the receiving side is gone
    pub fn send(&self, msg: StreamMessage) -> bool {
        (self.deliver)(msg)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// A live event stream subscription
///
/// Cancelling stops the reader without delivering anything further.
/// Dropping the handle cancels as well.
#[derive(Debug)]
pub struct EventSubscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    pub fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            token,
            task: Some(task),
        }
    }

    /// Subscription with no reader task behind it (test doubles)
    pub fn detached(token: CancellationToken) -> Self {
        Self { token, task: None }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Operations against the session service inside a sandbox
///
/// Every call takes the sandbox base URL (`http://host:port`).
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Ok when the service reports healthy
    async fn health(&self, base_url: &str) -> Result<(), SessionError>;

    async fn create_session(
        &self,
        base_url: &str,
        opts: &SessionOptions,
    ) -> Result<SessionInfo, SessionError>;

    /// Open the event stream; messages are delivered to `sink` until the
    /// subscription is cancelled or the stream ends
    async fn subscribe_events(
        &self,
        base_url: &str,
        opts: &RequestOptions,
        sink: EventSink,
    ) -> Result<EventSubscription, SessionError>;

    /// Submit a prompt without waiting for the agent's answer
    async fn send_prompt_async(
        &self,
        base_url: &str,
        session_id: &str,
        parts: &[PromptPart],
        opts: &PromptOptions,
    ) -> Result<(), SessionError>;

    async fn reply_permission(
        &self,
        base_url: &str,
        session_id: &str,
        permission_id: &str,
        decision: PermissionDecision,
        opts: &RequestOptions,
    ) -> Result<(), SessionError>;

    async fn abort_session(
        &self,
        base_url: &str,
        session_id: &str,
        opts: &RequestOptions,
    ) -> Result<(), SessionError>;
}
