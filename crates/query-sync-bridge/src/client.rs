//! Control-plane REST client.

use crate::{Query, QueryFetcher, SyncError, SyncResult, TaskStatus, TaskStatusUpdater};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct StatusUpdate {
    status: TaskStatus,
}

/// HTTP client for control-plane reads and the task status mutation.
#[derive(Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
}

impl ControlPlaneClient {
    /// Create a client for `api_url` (e.g., http://localhost:48293).
    pub fn new(api_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json_body(response: Response) -> SyncResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl QueryFetcher for ControlPlaneClient {
    async fn fetch(&self, query: &Query) -> SyncResult<Value> {
        let url = self.url(&query.path());
        debug!(url = %url, "GET");
        let response = self.client.get(&url).send().await?;
        Self::json_body(response).await
    }
}

#[async_trait]
impl TaskStatusUpdater for ControlPlaneClient {
    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> SyncResult<Value> {
        let url = self.url(&format!("/api/tasks/{}/status", task_id));
        debug!(url = %url, status = %status, "PATCH");
        let response = self
            .client
            .patch(&url)
            .json(&StatusUpdate { status })
            .send()
            .await?;
        Self::json_body(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_building() {
        let client =
            ControlPlaneClient::new("http://localhost:48293/", Duration::from_secs(3)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:48293");
        assert_eq!(
            client.url(&Query::Tasks { project_id: Some(2) }.path()),
            "http://localhost:48293/api/tasks?project_id=2"
        );
    }

    #[test]
    fn test_status_update_body() {
        let body = serde_json::to_value(StatusUpdate {
            status: TaskStatus::InProgress,
        })
        .unwrap();
        assert_eq!(body, json!({"status": "in_progress"}));
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_is_an_error() {
        let client =
            ControlPlaneClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            client.fetch(&Query::Projects).await,
            Err(SyncError::Http(_))
        ));
        assert!(matches!(
            client.update_task_status(1, TaskStatus::Done).await,
            Err(SyncError::Http(_))
        ));
    }
}
