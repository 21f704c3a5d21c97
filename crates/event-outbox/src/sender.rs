//! Submission to the control plane.

use crate::{EventRecord, OutboxError, OutboxResult};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Control-plane path accepting batched events.
pub const BATCH_PATH: &str = "/api/events/batch";

/// Control-plane path of the session collection.
pub const SESSIONS_PATH: &str = "/api/sessions";

/// Submits one outgoing set to the control plane.
///
/// Implementations make a single attempt; retrying is the buffer's job.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn submit(&self, events: &[EventRecord]) -> OutboxResult<()>;
}

/// Fields written when a session ends. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionClose {
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Opens and closes sessions on the control plane.
///
/// Events reference their session, so a session must be opened before
/// its first batch is accepted. Single attempt, no retry.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn open_session(&self, session_id: &str, project_id: Option<i64>) -> OutboxResult<()>;

    async fn close_session(&self, session_id: &str, close: &SessionClose) -> OutboxResult<()>;
}

/// Request body for `POST /api/events/batch`.
#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    events: &'a [EventRecord],
}

/// Request body for `POST /api/sessions`.
#[derive(Debug, Serialize)]
struct OpenSession<'a> {
    id: &'a str,
    project_id: Option<i64>,
}

/// HTTP transport for batches and session registration.
#[derive(Clone)]
pub struct HttpBatchTransport {
    client: Client,
    api_url: String,
    url: String,
}

impl HttpBatchTransport {
    /// Create a transport for the control plane at `api_url`.
    pub fn new(api_url: &str, timeout: Duration) -> OutboxResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let api_url = api_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            url: format!("{}{}", api_url, BATCH_PATH),
            api_url,
        })
    }

    /// Full batch submission URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}{}/{}", self.api_url, SESSIONS_PATH, session_id)
    }
}

async fn ensure_success(response: Response) -> OutboxResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(OutboxError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn submit(&self, events: &[EventRecord]) -> OutboxResult<()> {
        debug!(url = %self.url, events = events.len(), "Submitting batch");

        let response = self
            .client
            .post(&self.url)
            .json(&BatchRequest { events })
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl SessionRegistry for HttpBatchTransport {
    async fn open_session(&self, session_id: &str, project_id: Option<i64>) -> OutboxResult<()> {
        debug!(session_id = %session_id, "Opening session");

        let response = self
            .client
            .post(format!("{}{}", self.api_url, SESSIONS_PATH))
            .json(&OpenSession {
                id: session_id,
                project_id,
            })
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn close_session(&self, session_id: &str, close: &SessionClose) -> OutboxResult<()> {
        debug!(session_id = %session_id, "Closing session");

        let response = self
            .client
            .put(self.session_url(session_id))
            .json(close)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowEventType;
    use serde_json::{json, Map};

    fn transport(api_url: &str) -> HttpBatchTransport {
        HttpBatchTransport::new(api_url, Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_urls_join_without_double_slash() {
        let plain = transport("http://localhost:48293");
        let slashed = transport("http://localhost:48293/");

        assert_eq!(plain.url(), "http://localhost:48293/api/events/batch");
        assert_eq!(slashed.url(), "http://localhost:48293/api/events/batch");
        assert_eq!(
            slashed.session_url("s-1"),
            "http://localhost:48293/api/sessions/s-1"
        );
    }

    #[test]
    fn test_request_body_shapes() {
        let events = vec![EventRecord {
            id: None,
            session_id: "s".into(),
            event_type: FlowEventType::SessionStart,
            timestamp: "2025-01-01T00:00:00.000Z".into(),
            payload: Map::new(),
        }];

        let body = serde_json::to_value(BatchRequest { events: &events }).unwrap();
        assert_eq!(body["events"][0]["event_type"], json!("session_start"));
        assert_eq!(body["events"].as_array().unwrap().len(), 1);

        let open = serde_json::to_value(OpenSession {
            id: "s",
            project_id: None,
        })
        .unwrap();
        assert_eq!(open, json!({"id": "s", "project_id": null}));

        let close = serde_json::to_value(SessionClose {
            end_time: "2025-01-01T00:00:00.000Z".into(),
            token_usage: None,
            summary: Some("done".into()),
        })
        .unwrap();
        assert_eq!(
            close,
            json!({"end_time": "2025-01-01T00:00:00.000Z", "summary": "done"})
        );
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_is_an_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let transport = transport("http://127.0.0.1:9");

        assert!(matches!(transport.submit(&[]).await, Err(OutboxError::Http(_))));
        assert!(matches!(
            transport.open_session("s-1", None).await,
            Err(OutboxError::Http(_))
        ));
    }
}
