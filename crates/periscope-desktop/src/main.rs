use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use periscope_plugin::{
    discover_plugins, plugin_folders, spawn_discovery, CoordinatorHandle, DispatchCoordinator,
    EventBus, HostEvent, MetroTransport, RuntimeConfig, StaticGatekeeper, StaticResolver,
    SystemClock,
};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_CONFIG_FILE: &str = "periscope.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("PERISCOPE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = RuntimeConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // Built-in plugins first so they win over discovered manifests with the same id
    let mut resolver = StaticResolver::new();
    let mut definitions = Vec::new();
    if config.no_embedded_plugins {
        tracing::info!("embedded plugins disabled");
    } else {
        periscope_network::register(&mut resolver);
        definitions.push(periscope_network::definition());
    }
    let folders = plugin_folders(&config);
    definitions.extend(discover_plugins(&folders));
    tracing::info!(
        folders = folders.len(),
        definitions = definitions.len(),
        "plugin definitions collected"
    );

    let gatekeeper = Arc::new(StaticGatekeeper::new(config.enabled_gatekeepers.iter().cloned()));
    let metro = config.metro.clone();
    let handle = CoordinatorHandle::new(DispatchCoordinator::new(
        config,
        gatekeeper,
        Arc::new(resolver),
        EventBus::default(),
    ));

    let event_log = spawn_event_log(handle.subscribe());

    handle.start(definitions).await;
    let diagnostics = handle.diagnostics().await;
    tracing::info!(
        gatekeeped = diagnostics.gatekeeped.len(),
        disabled = diagnostics.disabled.len(),
        failed = diagnostics.failed.len(),
        "plugin runtime started"
    );
    for failed in &diagnostics.failed {
        tracing::warn!(plugin = %failed.id, "plugin unavailable: {}", failed.reason);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let discovery = if metro.enabled {
        let transport =
            Arc::new(MetroTransport::new(&metro).context("failed to set up Metro transport")?);
        tracing::info!(url = %transport.url(), "watching for Metro");
        Some(spawn_discovery(
            transport,
            handle.clone(),
            Arc::new(SystemClock),
            metro.query_interval(),
            shutdown_rx,
        ))
    } else {
        tracing::info!("Metro discovery disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    shutdown_tx.send(true).ok();
    if let Some(task) = discovery {
        if let Err(e) = task.await {
            tracing::error!("discovery task failed: {e}");
        }
    }
    event_log.abort();
    Ok(())
}

/// Log every host event; this binary has no UI to hand them to.
fn spawn_event_log(mut rx: broadcast::Receiver<HostEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(HostEvent::ServerError {
                    message,
                    details,
                    urgent,
                }) => {
                    tracing::warn!(
                        urgent,
                        details = details.as_deref().unwrap_or_default(),
                        "{message}"
                    );
                }
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    tracing::info!(event = event.name(), %payload, "host event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "host event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
