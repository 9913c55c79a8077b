mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    mock_host::{
        privacy_configuration, HttpFetcher, MockHost, RemoteFetcher, StaticFetcher,
        PRIVACY_CONFIGURATION_ID,
    },
    ChannelHostSink, DebugToolsMessages, Transport,
};
use shared::{domain::ResourceId, protocol::UpdateResourceParams};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use workflow::{MessagingServices, WorkflowEvent, WorkflowRunner, WorkflowSnapshot};

const SEED_CONTENTS: &str = r#"{"version":1,"features":{}}"#;

#[derive(Parser, Debug)]
struct Cli {
    /// TOML settings file, defaults to ./debug-tools.toml
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the features and print the resulting workflow snapshot.
    Show,
    /// Save edited contents for a resource.
    Edit {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        content: String,
    },
    /// Point a resource at a new remote URL.
    Fetch {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (sink, outbound) = ChannelHostSink::new();
    let transport = Transport::new(Arc::new(sink), settings.transport_options());
    let fetcher: Arc<dyn RemoteFetcher> = if settings.remote_fetch {
        Arc::new(HttpFetcher::new())
    } else {
        Arc::new(StaticFetcher::new(SEED_CONTENTS))
    };
    let host = MockHost::spawn(
        outbound,
        transport.inbound(),
        vec![privacy_configuration(SEED_CONTENTS)],
        fetcher,
    );

    let api = Arc::new(DebugToolsMessages::new(Arc::clone(&transport)));
    let mut runner = WorkflowRunner::new(
        Arc::new(MessagingServices::new(api)),
        settings.workflow_options(),
    );
    runner.start();
    let loaded = runner.settle().await;
    info!(state = %loaded.state, "debug tools: features loaded");

    let snapshot = match save_event(cli.command, &loaded) {
        Some(event) if loaded.matches("editing.Enabled") => {
            runner.send(event);
            runner.settle().await
        }
        Some(event) => {
            warn!(event = event.name(), state = %loaded.state, "debug tools: editor not available");
            loaded
        }
        None => loaded,
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    host.shutdown();
    transport.close();

    if let Some(error) = &snapshot.context.error {
        bail!("workflow ended with error: {error}");
    }
    Ok(())
}

fn save_event(command: Command, snapshot: &WorkflowSnapshot) -> Option<WorkflowEvent> {
    let target = |id: Option<String>| -> ResourceId {
        id.map(ResourceId::from)
            .or_else(|| snapshot.context.current_resource.clone())
            .unwrap_or_else(|| ResourceId::from(PRIVACY_CONFIGURATION_ID))
    };

    match command {
        Command::Show => None,
        Command::Edit { id, content } => Some(WorkflowEvent::SaveEdited(
            UpdateResourceParams::edited(target(id), content),
        )),
        Command::Fetch { id, url } => Some(WorkflowEvent::SaveNewRemote(
            UpdateResourceParams::remote(target(id), url),
        )),
    }
}
