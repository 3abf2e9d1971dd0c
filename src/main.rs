//! Wiring: config -> tracing -> State Store -> Scene Registry -> Scene
//! Runtime -> MQTT transport, then block on a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pidicon::config::{Cli, Config};
use pidicon::mqtt::{self, MqttConfig};
use pidicon::router::CommandRouter;
use pidicon::runtime::SceneRuntime;
use pidicon::scene::registry;
use pidicon::store::{resolve_persist_path, StateStore};

fn init_tracing() {
    let file_appender = tracing_appender::rolling::daily("logs", "pidicon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the process for the
    // non-blocking writer to flush on exit, and main() never returns early.
    Box::leak(Box::new(guard));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli).context("loading configuration")?;

    let persist_path = resolve_persist_path(config.state_file.clone(), None);
    let store = StateStore::new(persist_path, config.persistence_debounce);
    store.load_from_disk();
    tokio::spawn(store.clone().run_persistence_loop());

    let scene_dir_refs: Vec<&std::path::Path> = config.scene_dirs.iter().map(|p| p.as_path()).collect();
    let registry = Arc::new(registry::discover(&scene_dir_refs));
    tracing::info!(scenes = registry.len(), "scene registry ready");

    let runtime = Arc::new(
        SceneRuntime::new(store.clone(), registry).with_error_threshold(config.consecutive_error_threshold),
    );

    if config.device_drivers.is_empty() {
        tracing::warn!("no devices configured (PIDICON_DEVICE_DRIVERS is empty)");
    }
    for (device_id, kind) in &config.device_drivers {
        runtime.register_device(device_id.clone(), *kind, device_id.as_str()).await;
        tracing::info!(device = %device_id, driver = %kind, "device registered");
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let router = Arc::new(CommandRouter::new(runtime.clone(), config.mqtt.namespace.clone(), outbound_tx));

    let (mqtt_client, mqtt_event_loop) = mqtt::connect(MqttConfig {
        client_id: format!("pidicon-{}", std::process::id()),
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        keep_alive: Duration::from_secs(30),
    });

    tokio::spawn(mqtt::run_outbound(mqtt_client.clone(), outbound_rx));
    let inbound_router = router.clone();
    tokio::spawn(async move {
        mqtt::run_inbound(mqtt_client, mqtt_event_loop, &inbound_router).await;
    });

    let heartbeat_store = store.clone();
    let heartbeat_interval = config.heartbeat_interval;
    let metrics_router = router.clone();
    let metrics_devices: Vec<_> = config.device_drivers.keys().cloned().collect();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            heartbeat_store.update_heartbeat();
            for device_id in &metrics_devices {
                metrics_router.publish_metrics(device_id);
            }
        }
    });

    tracing::info!("pidicon started");
    shutdown_signal().await;
    tracing::info!("shutdown signal received, flushing state");

    if let Err(err) = store.flush().await {
        tracing::error!(%err, "failed to flush state on shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

