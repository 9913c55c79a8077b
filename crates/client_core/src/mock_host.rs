//! In-process stand-in for the native host, used by the demo binary and tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::{
        DebugToolsEdit, RemoteFetch, RemoteResource, RemoteSource, ResourceId, ResourceVersion,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        GetFeaturesResponse, InboundEvent, OutboundMessage, ResourceUpdateSource,
        UpdateResourceParams, GET_FEATURES, UPDATE_RESOURCE,
    },
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::transport::InboundHandle;

pub const PRIVACY_CONFIGURATION_ID: &str = "privacy-configuration";
pub const PRIVACY_CONFIGURATION_URL: &str =
    "https://staticcdn.duckduckgo.com/trackerblocking/config/v2/macos-config.json";

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch '{url}'"))?
            .error_for_status()
            .with_context(|| format!("remote '{url}' returned an error status"))?;
        response
            .text()
            .await
            .with_context(|| format!("failed to read body of '{url}'"))
    }
}

/// Answers every fetch with the same body.
pub struct StaticFetcher {
    body: String,
}

impl StaticFetcher {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl RemoteFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Ok(self.body.clone())
    }
}

pub fn privacy_configuration(contents: impl Into<String>) -> RemoteResource {
    RemoteResource {
        id: ResourceId::from(PRIVACY_CONFIGURATION_ID),
        url: PRIVACY_CONFIGURATION_URL.to_string(),
        name: "Privacy Config".to_string(),
        current: ResourceVersion {
            source: RemoteSource::Remote(RemoteFetch {
                url: PRIVACY_CONFIGURATION_URL.to_string(),
                fetched_at: Utc::now(),
            }),
            contents: contents.into(),
            content_type: "application/json".to_string(),
        },
    }
}

#[derive(Default)]
struct MockHostState {
    resources: Vec<RemoteResource>,
    received: Vec<OutboundMessage>,
    scripted_failures: HashMap<String, VecDeque<ApiError>>,
}

pub struct MockHost {
    state: Arc<Mutex<MockHostState>>,
    inbound: InboundHandle,
    task: JoinHandle<()>,
}

impl MockHost {
    /// Serves `outbound` until the sending side is dropped, replying through `inbound`.
    pub fn spawn(
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        inbound: InboundHandle,
        resources: Vec<RemoteResource>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        let state = Arc::new(Mutex::new(MockHostState {
            resources,
            ..MockHostState::default()
        }));

        let task_state = Arc::clone(&state);
        let replies = inbound.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let method = message.method.clone();
                let reply = handle_message(&task_state, fetcher.as_ref(), message).await;
                if let Some(response) = reply {
                    replies.deliver(InboundEvent::reply(method, response));
                }
            }
            debug!("mock host: outbound channel closed");
        });

        Self {
            state,
            inbound,
            task,
        }
    }

    /// Makes the next `method` request fail with `error`.
    pub async fn fail_next(&self, method: &str, error: ApiError) {
        self.state
            .lock()
            .await
            .scripted_failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn push(&self, subscription: &str, payload: Value) {
        self.inbound.deliver(InboundEvent::push(subscription, payload));
    }

    pub async fn received(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.received.clone()
    }

    pub async fn resources(&self) -> Vec<RemoteResource> {
        self.state.lock().await.resources.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_message(
    state: &Mutex<MockHostState>,
    fetcher: &dyn RemoteFetcher,
    message: OutboundMessage,
) -> Option<Value> {
    let scripted = {
        let mut guard = state.lock().await;
        guard.received.push(message.clone());
        guard
            .scripted_failures
            .get_mut(&message.method)
            .and_then(VecDeque::pop_front)
    };
    if let Some(error) = scripted {
        info!(method = %message.method, "mock host: replying with scripted failure");
        return Some(error.into_response());
    }

    match message.method.as_str() {
        GET_FEATURES => {
            let resources = state.lock().await.resources.clone();
            to_response(&GetFeaturesResponse::with_resources(resources))
        }
        UPDATE_RESOURCE => Some(match update_resource(state, fetcher, message.params).await {
            Ok(response) => to_response(&response).unwrap_or(Value::Null),
            Err(error) => error.into_response(),
        }),
        other => {
            warn!(method = other, "mock host: unhandled message");
            Some(
                ApiError::new(ErrorCode::Unsupported, format!("unhandled message: {other}"))
                    .into_response(),
            )
        }
    }
}

async fn update_resource(
    state: &Mutex<MockHostState>,
    fetcher: &dyn RemoteFetcher,
    params: Value,
) -> Result<GetFeaturesResponse, ApiError> {
    let params: UpdateResourceParams = serde_json::from_value(params)
        .map_err(|err| ApiError::new(ErrorCode::Validation, err.to_string()))?;

    let now = Utc::now();
    let version = match params.source {
        ResourceUpdateSource::Remote(remote) => {
            let contents = fetcher
                .fetch(&remote.url)
                .await
                .map_err(|err| ApiError::new(ErrorCode::Internal, format!("{err:#}")))?;
            ResourceVersion {
                source: RemoteSource::Remote(RemoteFetch {
                    url: remote.url,
                    fetched_at: now,
                }),
                contents,
                content_type: "application/json".to_string(),
            }
        }
        ResourceUpdateSource::DebugTools(edit) => ResourceVersion {
            source: RemoteSource::DebugTools(DebugToolsEdit {
                content: None,
                modified_at: Some(now),
            }),
            contents: edit.content,
            content_type: "application/json".to_string(),
        },
    };

    let mut guard = state.lock().await;
    let resource = guard
        .resources
        .iter_mut()
        .find(|resource| resource.id == params.id)
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("unknown resource '{}'", params.id),
            )
        })?;
    resource.current = version;
    info!(resource = %params.id, "mock host: resource updated");
    Ok(GetFeaturesResponse::with_resources(guard.resources.clone()))
}

fn to_response(response: &GetFeaturesResponse) -> Option<Value> {
    match serde_json::to_value(response) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "mock host: failed to encode response");
            None
        }
    }
}
