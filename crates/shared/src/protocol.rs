use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Features, RemoteResource, ResourceId};

pub const GET_FEATURES: &str = "getFeatures";
pub const UPDATE_RESOURCE: &str = "updateResource";
pub const GET_YOUTUBE_VIDEO_DETAILS: &str = "getYouTubeVideoDetails";

/// Record delivered by the host into this process.
///
/// Replies to a request carry `responseMessageType`, subscription pushes carry
/// `messageType`. Nothing identifies an individual request, so consumers match
/// on field values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl InboundEvent {
    pub fn reply(method: impl Into<String>, response: Value) -> Self {
        Self {
            response_message_type: Some(method.into()),
            response: Some(response),
            ..Self::default()
        }
    }

    pub fn push(subscription: impl Into<String>, response: Value) -> Self {
        Self {
            message_type: Some(subscription.into()),
            response: Some(response),
            ..Self::default()
        }
    }

    /// Builds an event from an arbitrary host record. Only non-objects are
    /// rejected; a routing field that is not a string reads as absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        let record = value.as_object()?;
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            message_type: text("messageType"),
            response_message_type: text("responseMessageType"),
            response: record.get("response").cloned(),
            params: record.get("params").cloned(),
        })
    }

    /// What requests resolve with and subscribers receive: `response`, or `null`.
    pub fn payload(&self) -> Value {
        self.response.clone().unwrap_or(Value::Null)
    }

    pub fn is_reply_to(&self, method: &str) -> bool {
        self.response_message_type.as_deref() == Some(method)
    }

    pub fn is_push_for(&self, subscription: &str) -> bool {
        self.message_type.as_deref() == Some(subscription) || self.is_reply_to(subscription)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFeaturesResponse {
    pub features: Features,
}

impl GetFeaturesResponse {
    pub fn with_resources(resources: Vec<RemoteResource>) -> Self {
        let mut response = Self::default();
        response.features.remote_resources.resources = resources;
        response
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResourceParams {
    pub id: ResourceId,
    pub source: ResourceUpdateSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceUpdateSource {
    Remote(RemoteUpdate),
    DebugTools(DebugToolsUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUpdate {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugToolsUpdate {
    pub content: String,
}

impl UpdateResourceParams {
    pub fn remote(id: impl Into<ResourceId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: ResourceUpdateSource::Remote(RemoteUpdate { url: url.into() }),
        }
    }

    pub fn edited(id: impl Into<ResourceId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: ResourceUpdateSource::DebugTools(DebugToolsUpdate {
                content: content.into(),
            }),
        }
    }
}
