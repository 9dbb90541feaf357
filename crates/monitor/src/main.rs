//! Pod Restart Monitor
//!
//! Watches pods for crash-loop restarts, and once a pod restarts too often
//! inside the time window either rolls its Deployment back or notifies an
//! operator webhook.

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use monitor_lib::{
    health::{components, HealthRegistry},
    notify::WebhookNotifier,
    observability::{MonitorMetrics, StructuredLogger},
    remediation::{KubeClusterApi, MonitorConfig, RemediationMode, RestartMonitor},
    tracker::WindowConfig,
    CleanupScheduler, NamespaceWatcher, RecordStore, WatchScope,
};
use pod_restart_monitor::{api, config::MonitorSettings};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let settings = MonitorSettings::load()?;
    info!(
        namespaces = ?settings.namespaces,
        time_window_secs = settings.time_window.as_secs(),
        threshold = settings.threshold,
        notify_type = %settings.notify_type,
        rollback = settings.rollback,
        "Monitor configured"
    );

    let client = kube_client(settings.kubeconfig_path.as_deref()).await?;

    let health_registry = HealthRegistry::new();
    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&settings.cluster_name);

    let webhook = settings
        .webhook
        .as_ref()
        .map(|url| url.to_string())
        .unwrap_or_default();
    let notifier = WebhookNotifier::new(settings.notify_type.clone(), webhook)?;
    if settings.notify_type.uses_webhook() {
        health_registry.register(components::NOTIFIER).await;
    } else {
        health_registry
            .set_degraded(
                components::NOTIFIER,
                format!("unsupported notify type: {}", settings.notify_type),
            )
            .await;
    }

    let store = RecordStore::new();
    let monitor = Arc::new(RestartMonitor::new(
        store.clone(),
        MonitorConfig {
            window: WindowConfig {
                time_window: settings.time_window,
                threshold: settings.threshold,
            },
            mode: RemediationMode::from_rollback_flag(settings.rollback),
        },
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(notifier),
        metrics.clone(),
        logger.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    for scope in WatchScope::from_namespaces(&settings.namespaces) {
        let watcher = NamespaceWatcher::new(
            client.clone(),
            scope,
            monitor.clone(),
            health_registry.clone(),
            metrics.clone(),
            logger.clone(),
        );
        tasks.push(tokio::spawn(watcher.run(shutdown_tx.subscribe())));
    }

    let cleanup = CleanupScheduler::new(
        store,
        settings.time_window,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    );
    tasks.push(tokio::spawn(cleanup.run(shutdown_tx.subscribe())));

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_shutdown = shutdown_tx.subscribe();
    let api_port = settings.api_port;
    tasks.push(tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state, api_shutdown).await {
            warn!(error = %e, "API server failed");
        }
    }));

    health_registry.set_ready(true).await;
    logger.log_startup(MONITOR_VERSION, &settings.namespaces, settings.rollback);

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    // Receivers may already be gone if every task exited early.
    let _ = shutdown_tx.send(());

    let drain = async {
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(settings.shutdown_grace_period, drain)
        .await
        .is_err()
    {
        warn!(
            grace_period_secs = settings.shutdown_grace_period.as_secs(),
            "Tasks did not stop within the grace period"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build a client from an explicit kubeconfig, or from the environment
async fn kube_client(kubeconfig_path: Option<&Path>) -> Result<Client> {
    let Some(path) = kubeconfig_path else {
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("Invalid kubeconfig {}", path.display()))?;

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT received")
    }
}
