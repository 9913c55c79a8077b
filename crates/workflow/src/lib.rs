//! Resource editing workflow: a hierarchical state machine driven by host messages.

pub mod context;
pub mod events;
pub mod machine;
pub mod runner;
pub mod services;
pub mod state;

pub use context::WorkflowContext;
pub use events::{
    Command, Invocation, InvokeId, ServiceKind, ServiceOutput, ServiceRequest, WorkflowEvent,
};
pub use machine::{ResourceMachine, WorkflowOptions, WorkflowSnapshot};
pub use runner::WorkflowRunner;
pub use services::{MessagingServices, WorkflowServices};
pub use state::{EditingRegion, EditorState, ErrorsRegion, ResourcesState, WorkflowState};
