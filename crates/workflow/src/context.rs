use serde::Serialize;
use shared::domain::{FeatureName, Features, RemoteResource, ResourceId};

/// Extended state carried alongside the workflow state. Only machine actions mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub features: Option<Features>,
    pub resources: Vec<RemoteResource>,
    pub current_feature: Option<FeatureName>,
    pub current_resource: Option<ResourceId>,
    pub error: Option<String>,
    /// Bumped on every successful resource transition; views keyed on it remount.
    pub resource_key: u64,
}

impl WorkflowContext {
    pub fn current(&self) -> Option<&RemoteResource> {
        let id = self.current_resource.as_ref()?;
        self.resources.iter().find(|resource| &resource.id == id)
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&RemoteResource> {
        self.resources.iter().find(|resource| &resource.id == id)
    }

    pub(crate) fn contains(&self, id: &ResourceId) -> bool {
        self.resource(id).is_some()
    }

    /// Replaces the entry with the same id in place. Returns false when there is none.
    pub(crate) fn replace_resource(&mut self, updated: RemoteResource) -> bool {
        match self
            .resources
            .iter_mut()
            .find(|resource| resource.id == updated.id)
        {
            Some(slot) => {
                *slot = updated;
                true
            }
            None => false,
        }
    }
}
