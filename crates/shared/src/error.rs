use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    Unsupported,
    Internal,
}

/// Application-level failure a host may send back instead of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl ApiError {
    /// Extracts `{"error": {"code": ..., "message": ...}}` from a host reply, if present.
    pub fn from_response(response: &serde_json::Value) -> Option<Self> {
        if response.get("error").is_none() {
            return None;
        }
        serde_json::from_value::<ErrorEnvelope>(response.clone())
            .ok()
            .map(|envelope| envelope.error)
    }

    pub fn into_response(self) -> serde_json::Value {
        serde_json::to_value(ErrorEnvelope { error: self }).unwrap_or(serde_json::Value::Null)
    }
}
