//! SimpleMySql Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration, sets up the
//! Kubernetes client, and runs the controllers, the retention sweeper and
//! the metrics server until a shutdown signal arrives.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use simple_mysql_operator::{
    controllers::{self, Context},
    metrics, OperatorConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = OperatorConfig::from_env()?;
    info!(
        registry = %config.registry,
        version = %config.version,
        workers = config.workers,
        "Starting SimpleMySql Operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client, config));
    let shutdown = CancellationToken::new();

    let mut metrics_handle = tokio::spawn(metrics::serve(metrics_port, shutdown.clone()));
    let mut instance_controller = tokio::spawn(controllers::run_instance_controller(
        context.clone(),
        shutdown.clone(),
    ));
    let mut backup_controller = tokio::spawn(controllers::run_backup_controller(
        context.clone(),
        shutdown.clone(),
    ));
    let mut retention_sweeper = tokio::spawn(controllers::run_retention_sweeper(
        context.clone(),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = &mut instance_controller => {
            error!("SimpleMySql controller exited unexpectedly");
        }
        _ = &mut backup_controller => {
            error!("SimpleMySqlBackup controller exited unexpectedly");
        }
        _ = &mut retention_sweeper => {
            error!("Retention sweeper exited unexpectedly");
        }
        result = &mut metrics_handle => {
            error!(?result, "Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    let _ = tokio::join!(instance_controller, backup_controller, retention_sweeper);

    info!("SimpleMySql Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
