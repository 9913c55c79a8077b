//! Async interpreter for [`ResourceMachine`]: runs invoked services on tokio
//! tasks, feeds their outcomes back and publishes a snapshot after each step.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    events::{Command, Invocation, InvokeId, ServiceOutput, WorkflowEvent},
    machine::{ResourceMachine, WorkflowOptions, WorkflowSnapshot},
    services::{self, WorkflowServices},
};

type Outcome = (InvokeId, Result<ServiceOutput, String>);

pub struct WorkflowRunner {
    machine: ResourceMachine,
    services: Arc<dyn WorkflowServices>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    outcome_rx: mpsc::UnboundedReceiver<Outcome>,
    running: HashMap<InvokeId, JoinHandle<()>>,
    snapshots: watch::Sender<WorkflowSnapshot>,
}

impl WorkflowRunner {
    pub fn new(services: Arc<dyn WorkflowServices>, options: WorkflowOptions) -> Self {
        let machine = ResourceMachine::new(options);
        let (snapshots, _) = watch::channel(machine.snapshot());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            machine,
            services,
            outcome_tx,
            outcome_rx,
            running: HashMap::new(),
            snapshots,
        }
    }

    pub fn machine(&self) -> &ResourceMachine {
        &self.machine
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.machine.snapshot()
    }

    /// Receives a snapshot after every processed event or service outcome.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshots.subscribe()
    }

    /// Number of service tasks not yet settled.
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn start(&mut self) {
        let commands = self.machine.start();
        self.apply(commands);
    }

    pub fn send(&mut self, event: WorkflowEvent) {
        debug!(event = event.name(), "runner: event");
        let commands = self.machine.send(event);
        self.apply(commands);
    }

    /// Waits for the next service outcome and feeds it to the machine.
    /// Returns false when no service is running.
    pub async fn step(&mut self) -> bool {
        if self.running.is_empty() {
            return false;
        }
        let Some((invoke, outcome)) = self.outcome_rx.recv().await else {
            return false;
        };
        self.resolve(invoke, outcome);
        true
    }

    /// Drives the machine until no service is running.
    pub async fn settle(&mut self) -> WorkflowSnapshot {
        while self.step().await {}
        self.snapshot()
    }

    /// Processes `events` until the sender is dropped, then settles.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WorkflowEvent>,
    ) -> WorkflowSnapshot {
        self.start();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.send(event),
                    None => break,
                },
                Some((invoke, outcome)) = self.outcome_rx.recv() => {
                    self.resolve(invoke, outcome);
                }
            }
        }
        self.settle().await
    }

    fn resolve(&mut self, invoke: InvokeId, outcome: Result<ServiceOutput, String>) {
        self.running.remove(&invoke);
        match &outcome {
            Ok(_) => info!(invoke = invoke.0, "runner: service done"),
            Err(message) => info!(invoke = invoke.0, error = %message, "runner: service failed"),
        }
        let commands = self.machine.resolve(invoke, outcome);
        self.apply(commands);
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Invoke(invocation) => self.spawn(invocation),
                Command::Cancel(invoke) => {
                    if let Some(task) = self.running.remove(&invoke) {
                        task.abort();
                        debug!(invoke = invoke.0, "runner: service task aborted");
                    }
                }
            }
        }
        self.snapshots.send_replace(self.machine.snapshot());
    }

    fn spawn(&mut self, invocation: Invocation) {
        let Invocation { id, request } = invocation;
        let kind = request.kind();
        let handler = Arc::clone(&self.services);
        let outcomes = self.outcome_tx.clone();

        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(services::invoke(handler.as_ref(), request))
                .catch_unwind()
                .await;
            let outcome = match outcome {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => {
                    warn!(service = kind.name(), "runner: service panicked");
                    Err(format!("{} service panicked", kind.name()))
                }
            };
            let _ = outcomes.send((id, outcome));
        });
        debug!(invoke = id.0, service = kind.name(), "runner: service spawned");
        self.running.insert(id, task);
    }
}

impl Drop for WorkflowRunner {
    fn drop(&mut self) {
        for (_, task) in self.running.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;
