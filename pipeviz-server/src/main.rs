use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeviz_client::ClusterClient;
use pipeviz_core::trace::TraceLinker;
use pipeviz_server::api::{self, AppState};
use pipeviz_server::config::Config;
use pipeviz_server::scheduler::ActivityWatcher;
use pipeviz_server::service::{Broker, LiveLogSessions, RunningPipelines};
use pipeviz_server::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeviz_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting Pipeviz Server...");
    tracing::info!(
        "Watching namespace {} on {}",
        config.namespace,
        config.cluster_url
    );

    let trace = TraceLinker::new(config.trace_url_template.as_deref())
        .context("Invalid trace URL template")?;
    if !trace.is_enabled() {
        tracing::info!("No trace URL template configured, trace links disabled");
    }

    let mut client = ClusterClient::new(&config.cluster_url, &config.namespace);
    if let Some(token) = &config.cluster_token {
        client = client.with_token(token);
    }
    let client = Arc::new(client);

    let broker = Broker::with_policy(config.subscriber_buffer, config.overflow_policy());
    let registry = Arc::new(RunningPipelines::new(broker.clone()));
    let live_logs = LiveLogSessions::new(client.clone(), broker.clone(), config.streamer_config());

    let shutdown = CancellationToken::new();

    // Keep the registry in sync with the cluster
    let watcher = ActivityWatcher::new(client, registry.clone(), config.watcher_config());
    let watcher_handle = tokio::spawn(watcher.run(shutdown.clone()));

    // Stop on SIGINT/SIGTERM; closing all subscriptions ends open event
    // streams so the server can drain
    tokio::spawn({
        let shutdown = shutdown.clone();
        let broker = broker.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
            broker.close_all();
        }
    });

    let app = api::create_router(AppState {
        registry,
        live_logs,
        trace: Arc::new(trace),
        namespace: config.namespace.clone(),
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = watcher_handle.await {
        tracing::warn!("Activity watcher task failed: {}", e);
    }

    tracing::info!("Pipeviz Server stopped");
    Ok(())
}
