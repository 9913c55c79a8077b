use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::TransportOptions;
use shared::domain::ResourceId;
use workflow::WorkflowOptions;

pub const DEFAULT_CONFIG_FILE: &str = "debug-tools.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub request_timeout_ms: Option<u64>,
    pub initial_resource: Option<String>,
    pub log_filter: String,
    /// Fetch `save new remote` URLs over HTTP instead of serving canned contents.
    pub remote_fetch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            initial_resource: None,
            log_filter: "info".into(),
            remote_fetch: false,
        }
    }
}

impl Settings {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn workflow_options(&self) -> WorkflowOptions {
        WorkflowOptions {
            initial_resource: self.initial_resource.clone().map(ResourceId::from),
        }
    }
}

pub fn load_settings(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("request_timeout_ms") {
        set_timeout(settings, v);
    }
    if let Some(v) = file_cfg.get("initial_resource") {
        settings.initial_resource = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("log_filter") {
        settings.log_filter = v.clone();
    }
    if let Some(v) = file_cfg.get("remote_fetch") {
        set_flag(settings, v);
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("DEBUG_TOOLS_REQUEST_TIMEOUT_MS") {
        set_timeout(settings, &v);
    }
    if let Some(v) = var("APP__REQUEST_TIMEOUT_MS") {
        set_timeout(settings, &v);
    }

    if let Some(v) = var("APP__INITIAL_RESOURCE") {
        settings.initial_resource = Some(v);
    }

    if let Some(v) = var("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    if let Some(v) = var("APP__REMOTE_FETCH") {
        set_flag(settings, &v);
    }
}

fn set_timeout(settings: &mut Settings, raw: &str) {
    if let Ok(parsed) = raw.trim().parse::<u64>() {
        settings.request_timeout_ms = (parsed > 0).then_some(parsed);
    }
}

fn set_flag(settings: &mut Settings, raw: &str) {
    if let Ok(parsed) = raw.trim().parse::<bool>() {
        settings.remote_fetch = parsed;
    }
}
