use std::{collections::VecDeque, sync::Mutex, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{DebugToolsEdit, RemoteResource, RemoteSource, ResourceId, ResourceVersion},
    protocol::{GetFeaturesResponse, UpdateResourceParams},
};
use tokio::sync::oneshot;

use super::*;
use crate::services::validate_resource;

fn resource(id: &str, contents: &str) -> RemoteResource {
    RemoteResource {
        id: ResourceId::from(id),
        url: format!("https://example.com/{id}.json"),
        name: id.to_uppercase(),
        current: ResourceVersion {
            source: RemoteSource::DebugTools(DebugToolsEdit::default()),
            contents: contents.to_string(),
            content_type: "application/json".to_string(),
        },
    }
}

#[derive(Default)]
struct StubServices {
    features: Mutex<VecDeque<Result<Vec<RemoteResource>, String>>>,
    saves: Mutex<VecDeque<Result<RemoteResource, String>>>,
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl StubServices {
    fn with_features(resources: Vec<RemoteResource>) -> Self {
        let stub = Self::default();
        stub.features.lock().expect("features").push_back(Ok(resources));
        stub
    }

    fn fail_features(&self, message: &str) {
        self.features
            .lock()
            .expect("features")
            .push_front(Err(message.to_string()));
    }

    fn next_save(&self, outcome: Result<RemoteResource, String>) {
        self.saves.lock().expect("saves").push_back(outcome);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls").clone()
    }

    async fn save(&self, name: &'static str) -> Result<RemoteResource> {
        self.calls.lock().expect("calls").push(name);
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let outcome = self
            .saves
            .lock()
            .expect("saves")
            .pop_front()
            .unwrap_or_else(|| Err("no scripted save".to_string()));
        outcome.map_err(|message| anyhow!(message))
    }
}

#[async_trait]
impl WorkflowServices for StubServices {
    async fn get_features(&self) -> Result<GetFeaturesResponse> {
        self.calls.lock().expect("calls").push("getFeatures");
        let outcome = self
            .features
            .lock()
            .expect("features")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()));
        outcome
            .map(GetFeaturesResponse::with_resources)
            .map_err(|message| anyhow!(message))
    }

    async fn parse_resource(&self, resource: Option<RemoteResource>) -> Result<()> {
        self.calls.lock().expect("calls").push("parseJSON");
        if resource.as_ref().map(|r| r.current.contents.as_str()) == Some("panic") {
            panic!("parser blew up");
        }
        validate_resource(resource.as_ref())
    }

    async fn save_new_remote(&self, _params: UpdateResourceParams) -> Result<RemoteResource> {
        self.save("saveNewRemote").await
    }

    async fn save_edited(&self, _params: UpdateResourceParams) -> Result<RemoteResource> {
        self.save("saveEdited").await
    }
}

async fn started(stub: Arc<StubServices>) -> WorkflowRunner {
    let mut runner = WorkflowRunner::new(stub, WorkflowOptions::default());
    runner.start();
    runner.settle().await;
    runner
}

#[tokio::test]
async fn start_loads_features_and_shows_editor() {
    let r1 = resource("r1", "{}");
    let stub = Arc::new(StubServices::with_features(vec![r1.clone()]));
    let runner = started(Arc::clone(&stub)).await;

    let snapshot = runner.snapshot();
    assert!(snapshot.matches("ShowingEditor.editing.Enabled"));
    assert_eq!(snapshot.context.resources, vec![r1]);
    assert_eq!(snapshot.context.current_resource, Some(ResourceId::from("r1")));
    assert_eq!(snapshot.context.resource_key, 1);
    assert_eq!(stub.calls(), vec!["getFeatures", "parseJSON"]);
    assert_eq!(runner.in_flight(), 0);
}

#[tokio::test]
async fn save_edited_updates_the_resource() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "{}")]));
    let mut runner = started(Arc::clone(&stub)).await;

    let mut updated = resource("r1", "X");
    updated.current.source = RemoteSource::DebugTools(DebugToolsEdit::default());
    stub.next_save(Ok(updated));

    runner.send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited("r1", "X")));
    assert!(runner.machine().matches("editing.SavingEdited"));
    let snapshot = runner.settle().await;

    assert!(snapshot.matches("editing.Enabled"));
    assert_eq!(snapshot.context.resources[0].current.contents, "X");
    assert_eq!(snapshot.context.resource_key, 2);
    assert_eq!(snapshot.context.error, None);
}

#[tokio::test]
async fn save_failure_keeps_previous_resource() {
    let original = resource("r1", "{}");
    let stub = Arc::new(StubServices::with_features(vec![original.clone()]));
    let mut runner = started(Arc::clone(&stub)).await;
    stub.next_save(Err("oops!".to_string()));

    runner.send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited("r1", "X")));
    let snapshot = runner.settle().await;

    assert!(snapshot.matches("editing.Enabled"));
    assert!(snapshot.matches("errors.Some"));
    assert_eq!(snapshot.context.error.as_deref(), Some("oops!"));
    assert_eq!(snapshot.context.resources[0], original);
    assert_eq!(snapshot.context.resource_key, 1);
}

#[tokio::test]
async fn second_save_is_ignored_while_one_is_in_flight() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "{}")]));
    let mut runner = started(Arc::clone(&stub)).await;

    let (release, gate) = oneshot::channel();
    *stub.gate.lock().await = Some(gate);
    stub.next_save(Ok(resource("r1", "{\"fetched\":true}")));

    runner.send(WorkflowEvent::SaveNewRemote(UpdateResourceParams::remote(
        "r1",
        "https://example.com/next.json",
    )));
    tokio::time::sleep(Duration::from_millis(10)).await;
    runner.send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited("r1", "X")));

    assert!(runner.machine().matches("editing.SavingNewRemote"));
    assert_eq!(runner.in_flight(), 1);

    release.send(()).expect("release save");
    let snapshot = runner.settle().await;

    assert!(snapshot.matches("editing.Enabled"));
    assert_eq!(snapshot.context.resources[0].current.contents, "{\"fetched\":true}");
    assert_eq!(
        stub.calls(),
        vec!["getFeatures", "parseJSON", "saveNewRemote"]
    );
}

#[tokio::test]
async fn feature_failure_then_retry_recovers() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "{}")]));
    stub.fail_features("host unavailable");
    let mut runner = started(Arc::clone(&stub)).await;

    let snapshot = runner.snapshot();
    assert!(snapshot.matches("ShowingError"));
    assert_eq!(snapshot.context.error.as_deref(), Some("host unavailable"));

    runner.send(WorkflowEvent::Retry);
    let snapshot = runner.settle().await;

    assert!(snapshot.matches("ShowingEditor.editing.Enabled"));
    assert_eq!(snapshot.context.current_resource, Some(ResourceId::from("r1")));
    assert_eq!(snapshot.context.resource_key, 1);
    assert_eq!(snapshot.context.error, None);
    assert_eq!(
        stub.calls(),
        vec!["getFeatures", "getFeatures", "parseJSON"]
    );
}

#[tokio::test]
async fn invalid_json_resource_is_reported() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "{nope")]));
    let runner = started(stub).await;

    let snapshot = runner.snapshot();
    assert!(snapshot.matches("ResourceInvalid"));
    let error = snapshot.context.error.expect("parse error");
    assert!(error.starts_with("resource 'r1' is not valid JSON"), "{error}");
}

#[tokio::test]
async fn empty_feature_list_marks_resource_invalid() {
    let stub = Arc::new(StubServices::with_features(Vec::new()));
    let runner = started(stub).await;

    let snapshot = runner.snapshot();
    assert!(snapshot.matches("ShowingResources.ResourceInvalid"));
    assert_eq!(
        snapshot.context.error.as_deref(),
        Some("no remote resource selected")
    );
}

#[tokio::test]
async fn panicking_service_settles_as_failure() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "panic")]));
    let runner = started(stub).await;

    let snapshot = runner.snapshot();
    assert!(snapshot.matches("ResourceInvalid"));
    assert_eq!(
        snapshot.context.error.as_deref(),
        Some("parseJSON service panicked")
    );
}

#[tokio::test]
async fn run_processes_events_and_publishes_snapshots() {
    let stub = Arc::new(StubServices::with_features(vec![resource("r1", "{}")]));
    stub.next_save(Ok(resource("r1", "[1]")));
    let runner = WorkflowRunner::new(stub, WorkflowOptions::default());
    let mut snapshots = runner.subscribe();

    let (events, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(runner.run(rx));

    snapshots
        .wait_for(|snapshot| snapshot.matches("editing.Enabled"))
        .await
        .expect("editor shown");
    events
        .send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited("r1", "[1]")))
        .expect("send event");
    snapshots
        .wait_for(|snapshot| snapshot.context.resource_key == 2)
        .await
        .expect("save applied");
    drop(events);

    let last = task.await.expect("join");
    assert!(last.matches("editing.Enabled"));
    assert_eq!(last.context.resources[0].current.contents, "[1]");
}
