use serde::{Deserialize, Serialize};
use shared::{
    domain::RemoteResource,
    protocol::{GetFeaturesResponse, UpdateResourceParams},
};

/// Events the UI may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WorkflowEvent {
    #[serde(rename = "save new remote")]
    SaveNewRemote(UpdateResourceParams),
    #[serde(rename = "save edited")]
    SaveEdited(UpdateResourceParams),
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "clearErrors")]
    ClearErrors,
    #[serde(rename = "👆 retry")]
    Retry,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SaveNewRemote(_) => "save new remote",
            Self::SaveEdited(_) => "save edited",
            Self::Error => "error",
            Self::ClearErrors => "clearErrors",
            Self::Retry => "👆 retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvokeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    GetFeatures,
    ParseResource,
    SaveNewRemote,
    SaveEdited,
}

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetFeatures => "getFeatures",
            Self::ParseResource => "parseJSON",
            Self::SaveNewRemote => "saveNewRemote",
            Self::SaveEdited => "saveEdited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRequest {
    GetFeatures,
    ParseResource(Option<RemoteResource>),
    SaveNewRemote(UpdateResourceParams),
    SaveEdited(UpdateResourceParams),
}

impl ServiceRequest {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::GetFeatures => ServiceKind::GetFeatures,
            Self::ParseResource(_) => ServiceKind::ParseResource,
            Self::SaveNewRemote(_) => ServiceKind::SaveNewRemote,
            Self::SaveEdited(_) => ServiceKind::SaveEdited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub id: InvokeId,
    pub request: ServiceRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutput {
    Features(GetFeaturesResponse),
    Parsed,
    Resource(RemoteResource),
}

/// Side effects the interpreter must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Invoke(Invocation),
    Cancel(InvokeId),
}

/// Everything the machine reacts to: UI events, raised events, and service outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MachineEvent {
    Event(WorkflowEvent),
    Done {
        invoke: InvokeId,
        output: ServiceOutput,
    },
    Failed {
        invoke: InvokeId,
        message: String,
    },
}

impl MachineEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Event(event) => event.name(),
            Self::Done { .. } => "done.invoke",
            Self::Failed { .. } => "error.invoke",
        }
    }

    pub(crate) fn invoke_id(&self) -> Option<InvokeId> {
        match self {
            Self::Event(_) => None,
            Self::Done { invoke, .. } | Self::Failed { invoke, .. } => Some(*invoke),
        }
    }
}
