//! # conduit-session
//!
//! Client for the session service embedded in each sandbox.
//!
//! - `SessionClient` - the seam the orchestrator talks through
//! - `HttpSessionClient` - HTTP implementation; the event stream is consumed
//!   by a dedicated task that forwards `StreamMessage`s to an `EventSink`
//! - `SessionEvent` - one structured event from the stream

pub mod client;
pub mod error;
pub mod event;
pub mod http;
pub mod types;

pub use client::{EventSink, EventSubscription, SessionClient};
pub use error::SessionError;
pub use event::{SessionEvent, StreamMessage};
pub use http::HttpSessionClient;
pub use types::{
    PermissionDecision, PromptOptions, PromptPart, RequestOptions, SessionInfo, SessionOptions,
};
