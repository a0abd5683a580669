//! Contract for sending a queued write to the REST backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::HttpMethod;

/// Value of `json.status` that marks an application-level success.
pub const RESPONSE_STATUS_SUCCESS: &str = "success";

/// Envelope every backend endpoint answers with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseBody {
    pub fn success() -> Self {
        Self {
            status: RESPONSE_STATUS_SUCCESS.to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// What came back from the backend for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    /// HTTP status was 2xx.
    pub ok: bool,
    pub status_code: u16,
    /// Parsed body; `None` when the body was not the expected JSON envelope.
    pub json: Option<ResponseBody>,
}

impl TransportResponse {
    pub fn success() -> Self {
        Self {
            ok: true,
            status_code: 200,
            json: Some(ResponseBody::success()),
        }
    }

    pub fn http_error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status_code,
            json: Some(ResponseBody::error(message)),
        }
    }

    /// Transport-level and application-level success.
    pub fn is_success(&self) -> bool {
        self.ok
            && self
                .json
                .as_ref()
                .is_some_and(|body| body.status == RESPONSE_STATUS_SUCCESS)
    }

    /// Message recorded on a record when this response counts as a failure.
    pub fn failure_message(&self) -> String {
        let server_message = self
            .json
            .as_ref()
            .and_then(|body| body.message.as_deref())
            .filter(|m| !m.trim().is_empty());

        if !self.ok {
            return match server_message {
                Some(message) => format!("HTTP {}: {}", self.status_code, message),
                None => format!("HTTP {}: request failed", self.status_code),
            };
        }
        match server_message {
            Some(message) => message.to_string(),
            None => "Server did not confirm the change".to_string(),
        }
    }
}

/// Failures where no usable HTTP response exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends one write to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: &serde_json::Value,
    ) -> Result<TransportResponse, TransportError>;
}
