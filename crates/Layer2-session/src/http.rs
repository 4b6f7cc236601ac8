//! HTTP implementation of `SessionClient`

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{retry::Never, Event, EventSource};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{EventSink, EventSubscription, SessionClient};
use crate::error::SessionError;
use crate::event::{SessionEvent, StreamMessage};
use crate::types::{
    PermissionDecision, PromptOptions, PromptPart, RequestOptions, SessionInfo, SessionOptions,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Session client speaking HTTP/JSON, with SSE for the event stream
///
/// The request timeout applies to every call except the event stream,
/// which stays open for the life of the task.
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    client: Client,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Serialize)]
struct ModelBody<'a> {
    #[serde(rename = "providerID")]
    provider_id: &'a str,
    #[serde(rename = "modelID")]
    model_id: &'a str,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    parts: &'a [PromptPart],
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<ModelBody<'a>>,
}

#[derive(Serialize)]
struct PermissionBody {
    response: PermissionDecision,
}

impl HttpSessionClient {
    pub fn new() -> Result<Self, SessionError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(request_timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Request(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn post(&self, base_url: &str, path: &str, request: &RequestOptions) -> RequestBuilder {
        self.client
            .post(Self::url(base_url, path))
            .query(&request.query())
            .timeout(self.request_timeout)
    }

    /// Map non-success statuses to `SessionError::Status`
    async fn check(response: Response) -> Result<Response, SessionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Reader loop for one event stream
    async fn stream_listener(mut es: EventSource, sink: EventSink, token: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Event stream cancelled by owner");
                    break;
                }
                next = es.next() => next,
            };

            let delivered = match next {
                Some(Ok(Event::Open)) => {
                    info!("Event stream opened");
                    true
                }
                Some(Ok(Event::Message(message))) => match SessionEvent::parse(&message.data) {
                    Ok(event) => sink.send(StreamMessage::Event(event)),
                    Err(e) => {
                        debug!("Skipping unparseable event: {}", e);
                        true
                    }
                },
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    info!("Event stream ended by server");
                    sink.send(StreamMessage::Disconnected("stream ended".to_string()));
                    break;
                }
                Some(Err(e)) => {
                    warn!("Event stream error: {}", e);
                    sink.send(StreamMessage::TransportError(e.to_string()));
                    break;
                }
            };

            if !delivered {
                debug!("Event stream owner is gone");
                break;
            }
        }

        es.close();
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn health(&self, base_url: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .get(Self::url(base_url, "/global/health"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check(response).await?;

        // An empty or non-JSON 2xx body counts as healthy
        let body = response.text().await.unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            if value.get("healthy").and_then(Value::as_bool) == Some(false) {
                return Err(SessionError::Unhealthy(body));
            }
        }
        Ok(())
    }

    async fn create_session(
        &self,
        base_url: &str,
        opts: &SessionOptions,
    ) -> Result<SessionInfo, SessionError> {
        let body = CreateSessionBody {
            title: opts.title.as_deref(),
        };
        let response = self
            .post(base_url, "/session", &opts.request)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let info: SessionInfo = response
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
        debug!("Created session {}", info.id);
        Ok(info)
    }

    async fn subscribe_events(
        &self,
        base_url: &str,
        opts: &RequestOptions,
        sink: EventSink,
    ) -> Result<EventSubscription, SessionError> {
        let request = self
            .client
            .get(Self::url(base_url, "/event"))
            .query(&opts.query());
        let mut es =
            EventSource::new(request).map_err(|e| SessionError::Subscribe(e.to_string()))?;
        es.set_retry_policy(Box::new(Never));

        let token = CancellationToken::new();
        let task = tokio::spawn(Self::stream_listener(es, sink, token.clone()));
        Ok(EventSubscription::new(token, task))
    }

    async fn send_prompt_async(
        &self,
        base_url: &str,
        session_id: &str,
        parts: &[PromptPart],
        opts: &PromptOptions,
    ) -> Result<(), SessionError> {
        let body = PromptBody {
            parts,
            agent: opts.agent.as_deref(),
            model: opts.model.as_ref().map(|m| ModelBody {
                provider_id: &m.provider_id,
                model_id: &m.model_id,
            }),
        };
        let path = format!("/session/{}/prompt_async", session_id);
        let response = self
            .post(base_url, &path, &opts.request)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn reply_permission(
        &self,
        base_url: &str,
        session_id: &str,
        permission_id: &str,
        decision: PermissionDecision,
        opts: &RequestOptions,
    ) -> Result<(), SessionError> {
        let path = format!("/session/{}/permissions/{}", session_id, permission_id);
        let response = self
            .post(base_url, &path, opts)
            .json(&PermissionBody { response: decision })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn abort_session(
        &self,
        base_url: &str,
        session_id: &str,
        opts: &RequestOptions,
    ) -> Result<(), SessionError> {
        let path = format!("/session/{}/abort", session_id);
        let response = self
            .post(base_url, &path, opts)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
