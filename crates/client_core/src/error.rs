use std::time::Duration;

use shared::{domain::ResourceId, error::ApiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed before '{method}' received a reply")]
    Closed { method: String },
    #[error("no reply to '{method}' within {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("failed to encode params for '{method}': {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid '{method}' response: {source}")]
    Validation {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },
    #[error("host response did not include resource '{id}'")]
    ResourceMissing { id: ResourceId },
    #[error(transparent)]
    Host(#[from] ApiError),
}
