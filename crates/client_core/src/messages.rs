//! Typed, validating client for the debug tools message surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::RemoteResource,
    error::ApiError,
    protocol::{
        GetFeaturesResponse, ResourceUpdateSource, UpdateResourceParams, GET_FEATURES,
        UPDATE_RESOURCE,
    },
};
use tracing::debug;
use url::Url;

use crate::{error::ClientError, transport::Transport};

#[async_trait]
pub trait DebugToolsApi: Send + Sync {
    async fn get_features(&self) -> Result<GetFeaturesResponse, ClientError>;
    async fn update_resource(
        &self,
        params: UpdateResourceParams,
    ) -> Result<RemoteResource, ClientError>;
}

pub struct DebugToolsMessages {
    transport: Arc<Transport>,
}

impl DebugToolsMessages {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

#[async_trait]
impl DebugToolsApi for DebugToolsMessages {
    async fn get_features(&self) -> Result<GetFeaturesResponse, ClientError> {
        let response = self.transport.request(GET_FEATURES, Value::Null).await?;
        parse_response(GET_FEATURES, response)
    }

    async fn update_resource(
        &self,
        params: UpdateResourceParams,
    ) -> Result<RemoteResource, ClientError> {
        validate_update_params(&params)?;
        let id = params.id.clone();
        let response = self.transport.request(UPDATE_RESOURCE, &params).await?;
        let features: GetFeaturesResponse = parse_response(UPDATE_RESOURCE, response)?;
        let updated = features
            .features
            .remote_resources
            .resources
            .into_iter()
            .find(|resource| resource.id == id)
            .ok_or(ClientError::ResourceMissing { id })?;
        debug!(resource = %updated.id, "messages: resource updated");
        Ok(updated)
    }
}

fn parse_response<T: DeserializeOwned>(
    method: &'static str,
    response: Value,
) -> Result<T, ClientError> {
    if let Some(err) = ApiError::from_response(&response) {
        return Err(ClientError::Host(err));
    }
    serde_json::from_value(response).map_err(|source| ClientError::Validation { method, source })
}

pub fn validate_update_params(params: &UpdateResourceParams) -> Result<(), ClientError> {
    if params.id.as_str().trim().is_empty() {
        return Err(ClientError::InvalidParams {
            reason: "resource id must not be empty".to_string(),
        });
    }
    if let ResourceUpdateSource::Remote(remote) = &params.source {
        let url = Url::parse(&remote.url).map_err(|err| ClientError::InvalidParams {
            reason: format!("remote url '{}' is not valid: {err}", remote.url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidParams {
                reason: format!("remote url '{}' must use http or https", remote.url),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::{error::ErrorCode, protocol::InboundEvent};
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::{ChannelHostSink, TransportOptions};

    fn resource(id: &str, contents: &str) -> Value {
        json!({
            "id": id,
            "url": "https://example.com/config.json",
            "name": "Config",
            "current": {
                "source": {"debugTools": {"modifiedAt": "2024-01-01T00:00:00Z"}},
                "contents": contents,
                "contentType": "application/json"
            }
        })
    }

    fn setup() -> (
        Arc<DebugToolsMessages>,
        mpsc::UnboundedReceiver<shared::protocol::OutboundMessage>,
    ) {
        let (sink, outbound) = ChannelHostSink::new();
        let transport = Transport::new(Arc::new(sink), TransportOptions::default());
        (Arc::new(DebugToolsMessages::new(transport)), outbound)
    }

    #[tokio::test]
    async fn get_features_validates_reply() {
        let (messages, mut outbound) = setup();
        let call = {
            let messages = Arc::clone(&messages);
            tokio::spawn(async move { messages.get_features().await })
        };
        assert_eq!(outbound.recv().await.expect("outbound").method, GET_FEATURES);
        messages.transport().dispatch(&InboundEvent::reply(
            GET_FEATURES,
            json!({"features": {"remoteResources": {"resources": [resource("r1", "{}")]}}}),
        ));

        let features = call.await.expect("join").expect("features");
        assert_eq!(features.features.remote_resources.resources.len(), 1);
    }

    #[tokio::test]
    async fn malformed_features_reply_is_a_validation_failure() {
        let (messages, mut outbound) = setup();
        let call = {
            let messages = Arc::clone(&messages);
            tokio::spawn(async move { messages.get_features().await })
        };
        outbound.recv().await.expect("outbound");
        messages
            .transport()
            .dispatch(&InboundEvent::reply(GET_FEATURES, json!({"features": 1})));

        let err = call.await.expect("join").expect_err("invalid reply");
        assert!(matches!(err, ClientError::Validation { method: GET_FEATURES, .. }));
    }

    #[tokio::test]
    async fn update_resource_picks_the_matching_resource_from_the_reply() {
        let (messages, mut outbound) = setup();
        let call = {
            let messages = Arc::clone(&messages);
            tokio::spawn(async move {
                messages
                    .update_resource(UpdateResourceParams::edited("r2", "X"))
                    .await
            })
        };
        let sent = outbound.recv().await.expect("outbound");
        assert_eq!(sent.method, UPDATE_RESOURCE);
        assert_eq!(sent.params["source"]["debugTools"]["content"], json!("X"));

        messages.transport().dispatch(&InboundEvent::reply(
            UPDATE_RESOURCE,
            json!({"features": {"remoteResources": {"resources": [
                resource("r1", "old"),
                resource("r2", "X")
            ]}}}),
        ));
        let updated = call.await.expect("join").expect("updated");
        assert_eq!(updated.id.as_str(), "r2");
        assert_eq!(updated.current.contents, "X");
    }

    #[tokio::test]
    async fn update_resource_without_matching_entry_fails() {
        let (messages, mut outbound) = setup();
        let call = {
            let messages = Arc::clone(&messages);
            tokio::spawn(async move {
                messages
                    .update_resource(UpdateResourceParams::edited("r9", "X"))
                    .await
            })
        };
        outbound.recv().await.expect("outbound");
        messages.transport().dispatch(&InboundEvent::reply(
            UPDATE_RESOURCE,
            json!({"features": {"remoteResources": {"resources": [resource("r1", "{}")]}}}),
        ));

        let err = call.await.expect("join").expect_err("missing");
        assert!(matches!(err, ClientError::ResourceMissing { ref id } if id.as_str() == "r9"));
    }

    #[tokio::test]
    async fn host_error_reply_surfaces_its_message() {
        let (messages, mut outbound) = setup();
        let call = {
            let messages = Arc::clone(&messages);
            tokio::spawn(async move {
                messages
                    .update_resource(UpdateResourceParams::edited("r1", "X"))
                    .await
            })
        };
        outbound.recv().await.expect("outbound");
        messages.transport().dispatch(&InboundEvent::reply(
            UPDATE_RESOURCE,
            ApiError::new(ErrorCode::Internal, "disk full").into_response(),
        ));

        let err = call.await.expect("join").expect_err("host error");
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn invalid_remote_url_is_rejected_before_sending() {
        let (messages, mut outbound) = setup();
        for url in ["not a url", "file:///etc/passwd"] {
            let err = messages
                .update_resource(UpdateResourceParams::remote("r1", url))
                .await
                .expect_err("invalid url");
            assert!(matches!(err, ClientError::InvalidParams { .. }));
        }
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn empty_resource_id_is_rejected() {
        let err = validate_update_params(&UpdateResourceParams::edited("  ", "X"))
            .expect_err("empty id");
        assert!(matches!(err, ClientError::InvalidParams { .. }));
    }
}
