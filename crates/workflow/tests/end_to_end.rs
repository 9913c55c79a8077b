use std::sync::Arc;

use client_core::{
    mock_host::{privacy_configuration, MockHost, StaticFetcher, PRIVACY_CONFIGURATION_ID},
    ChannelHostSink, DebugToolsMessages, Transport, TransportOptions,
};
use shared::{
    domain::{RemoteSource, ResourceId},
    error::{ApiError, ErrorCode},
    protocol::{UpdateResourceParams, GET_FEATURES, UPDATE_RESOURCE},
};
use workflow::{MessagingServices, WorkflowEvent, WorkflowOptions, WorkflowRunner};

struct Harness {
    runner: WorkflowRunner,
    host: MockHost,
    transport: Arc<Transport>,
}

fn harness(contents: &str) -> Harness {
    let (sink, outbound) = ChannelHostSink::new();
    let transport = Transport::new(Arc::new(sink), TransportOptions::default());
    let host = MockHost::spawn(
        outbound,
        transport.inbound(),
        vec![privacy_configuration(contents)],
        Arc::new(StaticFetcher::new("{\"fetched\":true}")),
    );
    let api = Arc::new(DebugToolsMessages::new(Arc::clone(&transport)));
    let services = Arc::new(MessagingServices::new(api));
    let runner = WorkflowRunner::new(services, WorkflowOptions::default());
    Harness {
        runner,
        host,
        transport,
    }
}

#[tokio::test]
async fn loads_features_from_the_host() {
    let mut h = harness("{\"features\":{}}");
    h.runner.start();
    let snapshot = h.runner.settle().await;

    assert!(snapshot.matches("ShowingEditor.editing.Enabled"));
    assert_eq!(
        snapshot.context.current_resource,
        Some(ResourceId::from(PRIVACY_CONFIGURATION_ID))
    );
    assert_eq!(snapshot.context.resource_key, 1);

    let received = h.host.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].method, GET_FEATURES);
    assert_eq!(h.transport.pending_waiters(), 0);
}

#[tokio::test]
async fn edited_contents_round_trip_through_the_host() {
    let mut h = harness("{}");
    h.runner.start();
    h.runner.settle().await;

    h.runner.send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited(
        PRIVACY_CONFIGURATION_ID,
        "{\"edited\":true}",
    )));
    let snapshot = h.runner.settle().await;

    assert!(snapshot.matches("editing.Enabled"));
    assert_eq!(snapshot.context.resource_key, 2);
    assert_eq!(snapshot.context.error, None);
    let current = &snapshot.context.resources[0].current;
    assert_eq!(current.contents, "{\"edited\":true}");
    assert!(matches!(current.source, RemoteSource::DebugTools(_)));

    let host_copy = h.host.resources().await;
    assert_eq!(host_copy[0].current.contents, "{\"edited\":true}");
}

#[tokio::test]
async fn new_remote_url_is_fetched_by_the_host() {
    let mut h = harness("{}");
    h.runner.start();
    h.runner.settle().await;

    h.runner.send(WorkflowEvent::SaveNewRemote(UpdateResourceParams::remote(
        PRIVACY_CONFIGURATION_ID,
        "https://example.com/next.json",
    )));
    let snapshot = h.runner.settle().await;

    let current = &snapshot.context.resources[0].current;
    assert_eq!(current.contents, "{\"fetched\":true}");
    match &current.source {
        RemoteSource::Remote(fetch) => assert_eq!(fetch.url, "https://example.com/next.json"),
        other => panic!("unexpected source {other:?}"),
    }
}

#[tokio::test]
async fn host_failure_is_shown_verbatim() {
    let mut h = harness("{}");
    h.runner.start();
    let before = h.runner.settle().await;

    h.host
        .fail_next(UPDATE_RESOURCE, ApiError::new(ErrorCode::Internal, "oops!"))
        .await;
    h.runner.send(WorkflowEvent::SaveEdited(UpdateResourceParams::edited(
        PRIVACY_CONFIGURATION_ID,
        "{\"edited\":true}",
    )));
    let snapshot = h.runner.settle().await;

    assert!(snapshot.matches("editing.Enabled"));
    assert!(snapshot.matches("errors.Some"));
    assert_eq!(snapshot.context.error.as_deref(), Some("oops!"));
    assert_eq!(snapshot.context.resources, before.context.resources);

    h.runner.send(WorkflowEvent::ClearErrors);
    assert!(h.runner.snapshot().matches("errors.None"));
}

#[tokio::test]
async fn feature_failure_recovers_on_retry() {
    let mut h = harness("{}");
    h.host
        .fail_next(
            GET_FEATURES,
            ApiError::new(ErrorCode::Internal, "features unavailable"),
        )
        .await;
    h.runner.start();
    let snapshot = h.runner.settle().await;

    assert!(snapshot.matches("ShowingError"));
    assert_eq!(
        snapshot.context.error.as_deref(),
        Some("features unavailable")
    );

    h.runner.send(WorkflowEvent::Retry);
    let snapshot = h.runner.settle().await;
    assert!(snapshot.matches("ShowingEditor.editing.Enabled"));
    assert_eq!(snapshot.context.error, None);
}

#[tokio::test]
async fn invalid_remote_url_never_reaches_the_host() {
    let mut h = harness("{}");
    h.runner.start();
    h.runner.settle().await;

    h.runner.send(WorkflowEvent::SaveNewRemote(UpdateResourceParams::remote(
        PRIVACY_CONFIGURATION_ID,
        "not a url",
    )));
    let snapshot = h.runner.settle().await;

    assert!(snapshot.matches("errors.Some"));
    assert!(snapshot.context.error.is_some());
    let updates = h
        .host
        .received()
        .await
        .into_iter()
        .filter(|message| message.method == UPDATE_RESOURCE)
        .count();
    assert_eq!(updates, 0);
}
