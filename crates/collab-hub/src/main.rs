//! # collab-hub
//!
//! Collaboration hub binary: loads settings, wires the permission gate,
//! session store and event publisher into the server, and runs it until
//! Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use collab_server::adapters::{
    ClaimsPermissionGate, EventSink, InMemorySessionStore, LogSink, QueuedPublisher, StoreTtls,
    WebhookSink,
};
use collab_server::{CollabServer, HubContext};
use collab_settings::HubSettings;

/// How long the publisher gets to drain its queue on shutdown.
const PUBLISHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Real-time form collaboration hub.
#[derive(Parser, Debug)]
#[command(name = "collab-hub", about = "Real-time form collaboration hub")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn build_sink(settings: &HubSettings) -> Result<Arc<dyn EventSink>> {
    match &settings.publisher.webhook_url {
        Some(url) => {
            let timeout = Duration::from_millis(settings.publisher.request_timeout_ms);
            let sink = WebhookSink::new(url.clone(), timeout)
                .context("Failed to build webhook client")?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(LogSink)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings =
        collab_settings::load_settings(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    if settings.logging.json {
        collab_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        collab_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics_handle = collab_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let store = Arc::new(InMemorySessionStore::new(StoreTtls::from(
        &settings.session_store,
    )));
    let (publisher, publisher_worker) =
        QueuedPublisher::spawn(build_sink(&settings)?, settings.publisher.queue_capacity);
    let publisher = publisher.with_origin(
        settings.publisher.source.clone(),
        settings.publisher.version.clone(),
    );

    let ctx = HubContext::new(
        settings.websocket.max_users_per_room,
        Arc::new(ClaimsPermissionGate),
        store.clone(),
        Arc::new(publisher),
    );
    let purge_interval = Duration::from_millis(settings.session_store.purge_interval_ms);
    let server = CollabServer::new(settings, ctx).with_metrics(metrics_handle);
    let purge = store.start_purge_task(purge_interval, server.shutdown().token());

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("collaboration hub listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let _ = server
        .shutdown()
        .graceful_shutdown(vec![handle, purge], None)
        .await;

    // The worker exits once the last publisher handle, held by the server,
    // is dropped.
    drop(server);
    if tokio::time::timeout(PUBLISHER_DRAIN_TIMEOUT, publisher_worker)
        .await
        .is_err()
    {
        tracing::warn!("publisher did not drain before timeout");
    }

    tracing::info!("shutdown complete");
    Ok(())
}
