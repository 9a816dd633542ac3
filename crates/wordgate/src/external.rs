//! External collaborator contracts (spec §6): the email listener, the
//! system-of-record spreadsheet/webhook, the operator notifier, and the
//! dashboard transport. Each is a trait so the coordinator and friends can
//! be exercised against fakes in tests; the `Http*` implementations are the
//! production collaborators, built the way the teacher's LLM client builds
//! its HTTP collaborator — a bounded retry loop over a `reqwest::Client`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum RecordStatus {
    Accepted,
    Declined,
    OnHold,
    Missed,
    Failed,
}

impl RecordStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            RecordStatus::Accepted => "Accepted",
            RecordStatus::Declined => "Declined",
            RecordStatus::OnHold => "On Hold",
            RecordStatus::Missed => "Missed",
            RecordStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request to {0} failed after {1} attempts: {2}")]
    Network(String, u32, String),

    #[error("request to {0} returned non-retryable status {1}")]
    Status(String, u16),
}

/// The external spreadsheet/webhook tracking every order's lifecycle
/// status. Retries are internal; callers only see a hard failure after the
/// retry budget is spent (spec §6 "with internal retry").
#[async_trait]
pub trait SystemOfRecord: Send + Sync {
    async fn update_status(
        &self,
        order_id: &str,
        status: RecordStatus,
        category: &str,
        received_date: Option<chrono::NaiveDate>,
    ) -> Result<(), CollaboratorError>;

    async fn read_status_map(&self) -> Result<std::collections::HashMap<String, String>, CollaboratorError>;
}

/// Best-effort operator paging. Failures are logged by the caller, never
/// fatal (spec §6).
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), CollaboratorError>;
}

/// Fan-out to connected dashboard clients. `message` already carries a
/// `type` tag per spec §6; transport errors for one client must not affect
/// others, which is enforced by the transport implementation, not this
/// trait.
#[async_trait]
pub trait DashboardTransport: Send + Sync {
    async fn broadcast(&self, message: serde_json::Value);
    async fn send_to(&self, client_id: &str, message: serde_json::Value);
}

/// `reqwest`-backed system-of-record client with bounded exponential
/// back-off on transient failures, built the way the teacher's OpenAI
/// client retries transient HTTP errors.
pub struct HttpSystemOfRecord {
    http: Client,
    base_url: String,
}

impl HttpSystemOfRecord {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Network("client builder".to_string(), 0, e.to_string()))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    async fn post_with_retry(&self, path: &str, body: serde_json::Value) -> Result<(), CollaboratorError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, backoff_ms = backoff, %url, "HttpSystemOfRecord: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(CollaboratorError::Status(url, status));
                }
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(CollaboratorError::Network(url, attempt + 1, e.to_string()));
                    }
                }
            }
        }
        Err(CollaboratorError::Network(url, MAX_RETRIES + 1, "retry budget exhausted".to_string()))
    }
}

#[async_trait]
impl SystemOfRecord for HttpSystemOfRecord {
    async fn update_status(
        &self,
        order_id: &str,
        status: RecordStatus,
        category: &str,
        received_date: Option<chrono::NaiveDate>,
    ) -> Result<(), CollaboratorError> {
        let body = serde_json::json!({
            "orderId": order_id,
            "status": status.as_label(),
            "category": category,
            "receivedDate": received_date,
        });
        self.post_with_retry("status", body).await
    }

    async fn read_status_map(&self) -> Result<std::collections::HashMap<String, String>, CollaboratorError> {
        let url = format!("{}/status", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(url.clone(), 1, e.to_string()))?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Status(url, response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Network(url, 1, e.to_string()))
    }
}

/// Webhook-backed operator notifier (e.g. Slack incoming webhook).
pub struct HttpOperatorNotifier {
    http: Client,
    webhook_url: String,
}

impl HttpOperatorNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Network("client builder".to_string(), 0, e.to_string()))?;
        Ok(Self { http, webhook_url: webhook_url.into() })
    }
}

#[async_trait]
impl OperatorNotifier for HttpOperatorNotifier {
    async fn notify(&self, text: &str) -> Result<(), CollaboratorError> {
        match self
            .http
            .post(&self.webhook_url)
            .json(&serde_json::json!({"text": text}))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                warn!(status = %response.status(), "HttpOperatorNotifier::notify: webhook rejected message");
                Err(CollaboratorError::Status(self.webhook_url.clone(), response.status().as_u16()))
            }
            Err(e) => Err(CollaboratorError::Network(self.webhook_url.clone(), 1, e.to_string())),
        }
    }
}
