//! Transition table and action executor for the resource workflow.
//!
//! The machine is synchronous and never awaits: service invocations are handed
//! back to the caller as [`Command`]s and their outcomes come back through
//! [`ResourceMachine::resolve`].

use std::collections::VecDeque;

use serde::Serialize;
use shared::domain::{FeatureName, ResourceId, REMOTE_RESOURCES_FEATURE};
use tracing::{debug, info, warn};

use crate::{
    context::WorkflowContext,
    events::{
        Command, Invocation, InvokeId, MachineEvent, ServiceKind, ServiceOutput, ServiceRequest,
        WorkflowEvent,
    },
    state::{EditingRegion, EditorState, ErrorsRegion, ResourcesState, WorkflowState},
};

const MAX_EVENTLESS_STEPS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    /// Resource selected after features load, when present in the list.
    pub initial_resource: Option<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    AssignFeatures,
    AssignCurrentFeature,
    AssignResource,
    AssignError,
    UpdateResource,
    ClearErrors,
    BumpVersion,
    RecordError,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Self::AssignFeatures => "assignFeatures",
            Self::AssignCurrentFeature => "assignCurrentFeature",
            Self::AssignResource => "assignResource",
            Self::AssignError => "assignError",
            Self::UpdateResource => "updateResource",
            Self::ClearErrors => "clearErrors",
            Self::BumpVersion => "bumpVersion",
            Self::RecordError => "recordError",
        }
    }
}

struct Transition {
    target: WorkflowState,
    actions: &'static [Action],
}

impl Transition {
    fn to(target: WorkflowState) -> Self {
        Self {
            target,
            actions: &[],
        }
    }

    fn with(target: WorkflowState, actions: &'static [Action]) -> Self {
        Self { target, actions }
    }
}

const SAVE_DONE: &[Action] = &[Action::UpdateResource, Action::ClearErrors, Action::BumpVersion];
const SAVE_FAILED: &[Action] = &[Action::RecordError];

/// `(state, event) -> (target, ordered actions)`.
fn transition(state: WorkflowState, event: &MachineEvent) -> Option<Transition> {
    use WorkflowState as S;

    match (state, event) {
        (
            S::Initial,
            MachineEvent::Done {
                output: ServiceOutput::Features(_),
                ..
            },
        ) => Some(Transition::with(S::ReadingFeature, &[Action::AssignFeatures])),
        (S::Initial, MachineEvent::Failed { .. }) => {
            Some(Transition::with(S::ShowingError, &[Action::AssignError]))
        }
        (S::ShowingError, MachineEvent::Event(WorkflowEvent::Retry)) => {
            Some(Transition::to(S::Initial))
        }
        (
            S::ShowingResources(ResourcesState::LoadingResource),
            MachineEvent::Done {
                output: ServiceOutput::Parsed,
                ..
            },
        ) => Some(Transition::to(S::editor(EditorState::default()))),
        (S::ShowingResources(ResourcesState::LoadingResource), MachineEvent::Failed { .. }) => {
            Some(Transition::with(
                S::ShowingResources(ResourcesState::ResourceInvalid),
                &[Action::AssignError],
            ))
        }
        (S::ShowingResources(ResourcesState::ShowingEditor(editor)), event) => {
            editor_transition(editor, event)
        }
        _ => None,
    }
}

fn editor_transition(editor: EditorState, event: &MachineEvent) -> Option<Transition> {
    let target = |errors: ErrorsRegion, editing: EditingRegion| {
        WorkflowState::editor(EditorState { errors, editing })
    };

    match (editor.editing, event) {
        // errors region
        (_, MachineEvent::Event(WorkflowEvent::Error)) => {
            Some(Transition::to(target(ErrorsRegion::Some, editor.editing)))
        }
        (_, MachineEvent::Event(WorkflowEvent::ClearErrors)) => {
            Some(Transition::to(target(ErrorsRegion::None, editor.editing)))
        }
        // editing region
        (EditingRegion::Enabled, MachineEvent::Event(WorkflowEvent::SaveNewRemote(_))) => Some(
            Transition::to(target(editor.errors, EditingRegion::SavingNewRemote)),
        ),
        (EditingRegion::Enabled, MachineEvent::Event(WorkflowEvent::SaveEdited(_))) => Some(
            Transition::to(target(editor.errors, EditingRegion::SavingEdited)),
        ),
        (
            EditingRegion::SavingNewRemote | EditingRegion::SavingEdited,
            MachineEvent::Done {
                output: ServiceOutput::Resource(_),
                ..
            },
        ) => Some(Transition::with(
            target(editor.errors, EditingRegion::Enabled),
            SAVE_DONE,
        )),
        (
            EditingRegion::SavingNewRemote | EditingRegion::SavingEdited,
            MachineEvent::Failed { .. },
        ) => Some(Transition::with(
            target(editor.errors, EditingRegion::Enabled),
            SAVE_FAILED,
        )),
        _ => None,
    }
}

/// Eventless transitions taken as soon as their source state is entered.
fn always(state: WorkflowState) -> Option<Transition> {
    match state {
        WorkflowState::ReadingFeature => Some(Transition::to(WorkflowState::ShowingResources(
            ResourcesState::ReadingResource,
        ))),
        WorkflowState::ShowingResources(ResourcesState::ReadingResource) => {
            Some(Transition::with(
                WorkflowState::ShowingResources(ResourcesState::LoadingResource),
                &[Action::AssignResource, Action::BumpVersion],
            ))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSnapshot {
    #[serde(skip)]
    pub state: WorkflowState,
    pub paths: Vec<String>,
    pub context: WorkflowContext,
}

impl WorkflowSnapshot {
    pub fn matches(&self, path: &str) -> bool {
        self.state.matches(path)
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveInvocation {
    id: InvokeId,
    kind: ServiceKind,
}

pub struct ResourceMachine {
    state: WorkflowState,
    context: WorkflowContext,
    options: WorkflowOptions,
    active: Option<ActiveInvocation>,
    next_invoke: u64,
    raised: VecDeque<WorkflowEvent>,
    started: bool,
}

impl ResourceMachine {
    pub fn new(options: WorkflowOptions) -> Self {
        Self {
            state: WorkflowState::Initial,
            context: WorkflowContext::default(),
            options,
            active: None,
            next_invoke: 1,
            raised: VecDeque::new(),
            started: false,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub fn matches(&self, path: &str) -> bool {
        self.state.matches(path)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn active_invocation(&self) -> Option<InvokeId> {
        self.active.map(|active| active.id)
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state,
            paths: self.state.paths(),
            context: self.context.clone(),
        }
    }

    /// Enters `Initial`. Calling it again is a no-op.
    pub fn start(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.started {
            return commands;
        }
        self.started = true;
        info!(state = %self.state, "workflow: started");
        self.sync_invocation(None, &mut commands);
        commands
    }

    pub fn send(&mut self, event: WorkflowEvent) -> Vec<Command> {
        self.run(MachineEvent::Event(event))
    }

    /// Feeds back the outcome of an invocation. Outcomes of invocations whose
    /// state has already been left are ignored.
    pub fn resolve(
        &mut self,
        invoke: InvokeId,
        outcome: Result<ServiceOutput, String>,
    ) -> Vec<Command> {
        let event = match outcome {
            Ok(output) => MachineEvent::Done { invoke, output },
            Err(message) => MachineEvent::Failed { invoke, message },
        };
        self.run(event)
    }

    fn run(&mut self, event: MachineEvent) -> Vec<Command> {
        let mut commands = Vec::new();
        if !self.started {
            warn!(event = event.name(), "workflow: event before start ignored");
            return commands;
        }

        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            self.step(&event, &mut commands);
            queue.extend(self.raised.drain(..).map(MachineEvent::Event));
        }
        commands
    }

    fn step(&mut self, event: &MachineEvent, commands: &mut Vec<Command>) {
        if let Some(invoke) = event.invoke_id() {
            match self.active {
                Some(active) if active.id == invoke => {}
                _ => {
                    debug!(invoke = invoke.0, "workflow: stale service outcome ignored");
                    return;
                }
            }
        }

        let Some(transition) = transition(self.state, event) else {
            debug!(
                state = %self.state,
                event = event.name(),
                "workflow: event has no transition in current state"
            );
            return;
        };

        if event.invoke_id().is_some() {
            // The service settled; leaving its state must not cancel it.
            self.active = None;
        }
        self.take(transition, event, commands);

        for _ in 0..MAX_EVENTLESS_STEPS {
            let Some(next) = always(self.state) else {
                return;
            };
            self.take(next, event, commands);
        }
        warn!(state = %self.state, "workflow: eventless transition limit reached");
    }

    fn take(&mut self, transition: Transition, event: &MachineEvent, commands: &mut Vec<Command>) {
        for action in transition.actions {
            self.execute(*action, event);
        }

        let previous = self.state;
        self.state = transition.target;
        if previous != self.state {
            info!(
                from = %previous,
                to = %self.state,
                event = event.name(),
                "workflow: transition"
            );
        }

        if self.state == WorkflowState::ReadingFeature && previous != WorkflowState::ReadingFeature
        {
            self.execute(Action::AssignCurrentFeature, event);
        }
        self.sync_invocation(Some(event), commands);
    }

    /// Cancels an invocation whose state was exited and starts the one the new state owns.
    fn sync_invocation(&mut self, event: Option<&MachineEvent>, commands: &mut Vec<Command>) {
        let wanted = self.state.invoked_service();

        if let Some(active) = self.active {
            if Some(active.kind) == wanted {
                return;
            }
            debug!(
                invoke = active.id.0,
                service = active.kind.name(),
                "workflow: invocation cancelled"
            );
            commands.push(Command::Cancel(active.id));
            self.active = None;
        }

        let Some(kind) = wanted else {
            return;
        };
        let Some(request) = self.service_request(kind, event) else {
            warn!(
                service = kind.name(),
                "workflow: invoking state entered without its payload"
            );
            return;
        };

        let id = InvokeId(self.next_invoke);
        self.next_invoke += 1;
        self.active = Some(ActiveInvocation { id, kind });
        debug!(invoke = id.0, service = kind.name(), "workflow: invocation started");
        commands.push(Command::Invoke(Invocation { id, request }));
    }

    fn service_request(
        &self,
        kind: ServiceKind,
        event: Option<&MachineEvent>,
    ) -> Option<ServiceRequest> {
        match kind {
            ServiceKind::GetFeatures => Some(ServiceRequest::GetFeatures),
            ServiceKind::ParseResource => {
                Some(ServiceRequest::ParseResource(self.context.current().cloned()))
            }
            ServiceKind::SaveNewRemote => match event {
                Some(MachineEvent::Event(WorkflowEvent::SaveNewRemote(params))) => {
                    Some(ServiceRequest::SaveNewRemote(params.clone()))
                }
                _ => None,
            },
            ServiceKind::SaveEdited => match event {
                Some(MachineEvent::Event(WorkflowEvent::SaveEdited(params))) => {
                    Some(ServiceRequest::SaveEdited(params.clone()))
                }
                _ => None,
            },
        }
    }

    fn execute(&mut self, action: Action, event: &MachineEvent) {
        debug!(action = action.name(), event = event.name(), "workflow: action");
        match action {
            Action::AssignFeatures => {
                if let MachineEvent::Done {
                    output: ServiceOutput::Features(response),
                    ..
                } = event
                {
                    self.context.resources = response.features.remote_resources.resources.clone();
                    self.context.features = Some(response.features.clone());
                    self.context.error = None;
                }
            }
            Action::AssignCurrentFeature => {
                self.context.current_feature = Some(FeatureName::from(REMOTE_RESOURCES_FEATURE));
            }
            Action::AssignResource => {
                let context = &self.context;
                let selected = context
                    .current_resource
                    .clone()
                    .filter(|id| context.contains(id))
                    .or_else(|| {
                        self.options
                            .initial_resource
                            .clone()
                            .filter(|id| context.contains(id))
                    })
                    .or_else(|| context.resources.first().map(|resource| resource.id.clone()));
                self.context.current_resource = selected;
            }
            Action::AssignError | Action::RecordError => {
                if let MachineEvent::Failed { message, .. } = event {
                    self.context.error = Some(message.clone());
                }
                if action == Action::RecordError {
                    self.raised.push_back(WorkflowEvent::Error);
                }
            }
            Action::UpdateResource => {
                if let MachineEvent::Done {
                    output: ServiceOutput::Resource(updated),
                    ..
                } = event
                {
                    if !self.context.replace_resource(updated.clone()) {
                        warn!(
                            resource = %updated.id,
                            "workflow: saved resource is not in the list"
                        );
                    }
                }
            }
            Action::ClearErrors => {
                self.context.error = None;
                self.raised.push_back(WorkflowEvent::ClearErrors);
            }
            Action::BumpVersion => {
                self.context.resource_key += 1;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
