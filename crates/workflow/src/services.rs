//! Services the workflow invokes while it sits in an invoking state.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use client_core::messages::DebugToolsApi;
use shared::{
    domain::RemoteResource,
    protocol::{GetFeaturesResponse, UpdateResourceParams},
};
use tracing::info;

use crate::events::{ServiceOutput, ServiceRequest};

#[async_trait]
pub trait WorkflowServices: Send + Sync {
    async fn get_features(&self) -> Result<GetFeaturesResponse>;
    /// Validates the selected resource before the editor is shown.
    async fn parse_resource(&self, resource: Option<RemoteResource>) -> Result<()>;
    async fn save_new_remote(&self, params: UpdateResourceParams) -> Result<RemoteResource>;
    async fn save_edited(&self, params: UpdateResourceParams) -> Result<RemoteResource>;
}

pub(crate) async fn invoke(
    services: &dyn WorkflowServices,
    request: ServiceRequest,
) -> Result<ServiceOutput> {
    match request {
        ServiceRequest::GetFeatures => services.get_features().await.map(ServiceOutput::Features),
        ServiceRequest::ParseResource(resource) => services
            .parse_resource(resource)
            .await
            .map(|()| ServiceOutput::Parsed),
        ServiceRequest::SaveNewRemote(params) => services
            .save_new_remote(params)
            .await
            .map(ServiceOutput::Resource),
        ServiceRequest::SaveEdited(params) => services
            .save_edited(params)
            .await
            .map(ServiceOutput::Resource),
    }
}

pub fn validate_resource(resource: Option<&RemoteResource>) -> Result<()> {
    let resource = resource.ok_or_else(|| anyhow!("no remote resource selected"))?;
    if resource.current.is_json() {
        serde_json::from_str::<serde_json::Value>(&resource.current.contents)
            .map_err(|err| anyhow!("resource '{}' is not valid JSON: {err}", resource.id))?;
    }
    Ok(())
}

/// Services backed by the typed message client.
pub struct MessagingServices {
    api: Arc<dyn DebugToolsApi>,
}

impl MessagingServices {
    pub fn new(api: Arc<dyn DebugToolsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl WorkflowServices for MessagingServices {
    async fn get_features(&self) -> Result<GetFeaturesResponse> {
        let response = self.api.get_features().await?;
        info!(
            resources = response.features.remote_resources.resources.len(),
            "services: features loaded"
        );
        Ok(response)
    }

    async fn parse_resource(&self, resource: Option<RemoteResource>) -> Result<()> {
        validate_resource(resource.as_ref())
    }

    async fn save_new_remote(&self, params: UpdateResourceParams) -> Result<RemoteResource> {
        let id = params.id.clone();
        let updated = self.api.update_resource(params).await?;
        info!(resource = %id, "services: remote source saved");
        Ok(updated)
    }

    async fn save_edited(&self, params: UpdateResourceParams) -> Result<RemoteResource> {
        let id = params.id.clone();
        let updated = self.api.update_resource(params).await?;
        info!(resource = %id, "services: edited contents saved");
        Ok(updated)
    }
}
