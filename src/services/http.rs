//! Shared HTTP plumbing for the cloud AI services.
//!
//! All services authenticate with a subscription key header, answer JSON,
//! and run long operations behind an `Operation-Location` URL that must be
//! polled until it reports a terminal status.

use crate::error::AnalysisError;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Header carrying the service key.
pub const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Polling parameters for long-running operations.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
        }
    }
}

/// Authenticated client for one service endpoint.
#[derive(Clone)]
pub struct ServiceClient {
    service: &'static str,
    endpoint: String,
    key: String,
    timeout_seconds: u64,
    http: reqwest::Client,
}

impl ServiceClient {
    pub fn new(
        service: &'static str,
        endpoint: &str,
        key: &str,
        timeout_seconds: u64,
    ) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AnalysisError::transient(service, format!("HTTP client: {}", e)))?;

        Ok(Self {
            service,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
            timeout_seconds,
            http,
        })
    }

    /// Join a path onto the configured endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Start an authenticated POST request.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url).header(KEY_HEADER, &self.key)
    }

    /// Start an authenticated GET request.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).header(KEY_HEADER, &self.key)
    }

    /// Send a request and map transport and status failures.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, AnalysisError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout {
                    service: self.service.to_string(),
                    seconds: self.timeout_seconds,
                }
            } else if e.is_connect() {
                AnalysisError::transient(self.service, format!("cannot connect to {}", self.endpoint))
            } else {
                AnalysisError::transient(self.service, format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(self.service, status, &body))
    }

    /// Send a request and decode its JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, AnalysisError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisError::invalid_response(self.service, e.to_string()))
    }

    /// Send a request that starts a long-running operation and return the
    /// URL to poll.
    pub async fn start_operation(&self, request: RequestBuilder) -> Result<String, AnalysisError> {
        let response = self.send(request).await?;
        operation_location(self.service, response.headers())
    }

    /// Poll an operation until it succeeds, returning the final document.
    pub async fn poll_operation(
        &self,
        operation_url: &str,
        settings: PollSettings,
    ) -> Result<Value, AnalysisError> {
        for attempt in 1..=settings.max_attempts {
            let body: Value = self.send_json(self.get(operation_url)).await?;

            match operation_state(&body) {
                OperationState::Succeeded => {
                    debug!("{} operation finished after {} polls", self.service, attempt);
                    return Ok(body);
                }
                OperationState::Failed(message) => {
                    return Err(AnalysisError::invalid_response(
                        self.service,
                        format!("operation failed: {}", message),
                    ));
                }
                OperationState::Running => {
                    tokio::time::sleep(settings.interval).await;
                }
            }
        }

        Err(AnalysisError::Timeout {
            service: self.service.to_string(),
            seconds: settings.interval.as_secs() * settings.max_attempts as u64,
        })
    }
}

/// Map a non-success status to an error. Throttling and server errors are
/// transient; other client errors are rejections.
pub fn status_error(service: &str, status: StatusCode, body: &str) -> AnalysisError {
    let message = error_message(body).unwrap_or_else(|| body.chars().take(200).collect());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AnalysisError::transient(service, format!("status {}: {}", status.as_u16(), message))
    } else {
        AnalysisError::Rejected {
            service: service.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

/// Extract `error.message` from a service error body.
fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.pointer("/error/message")
        .or_else(|| json.pointer("/error/innererror/message"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Read the `Operation-Location` header.
pub fn operation_location(service: &str, headers: &HeaderMap) -> Result<String, AnalysisError> {
    headers
        .get("operation-location")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| AnalysisError::invalid_response(service, "missing Operation-Location header"))
}

#[derive(Debug, PartialEq)]
pub enum OperationState {
    Running,
    Succeeded,
    Failed(String),
}

/// Interpret the `status` field of an operation document.
pub fn operation_state(body: &Value) -> OperationState {
    let status = body
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_lowercase();

    match status.as_str() {
        "succeeded" => OperationState::Succeeded,
        "failed" | "cancelled" | "canceled" | "validationfailed" => {
            let message = error_message(&body.to_string())
                .or_else(|| {
                    body.pointer("/errors/0/message")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
                .unwrap_or(status);
            OperationState::Failed(message)
        }
        _ => OperationState::Running,
    }
}
