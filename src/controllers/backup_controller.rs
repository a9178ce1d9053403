//! SimpleMySqlBackup controller
//!
//! Watches SimpleMySqlBackup resources and submits backup jobs.

use std::sync::Arc;

use futures::{future, StreamExt};
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::controllers::queue::{enqueue_event, process, ObjectKey, WorkQueue};
use crate::controllers::Context;
use crate::crd::SimpleMySqlBackup;
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::backup as backup_reconciler;

const KIND: &str = "SimpleMySqlBackup";

/// Run the SimpleMySqlBackup controller until `shutdown` is cancelled
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let api: Api<SimpleMySqlBackup> = Api::all(ctx.client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("SimpleMySqlBackup CRD not installed: {}", e);
        return;
    }

    info!("Starting SimpleMySqlBackup controller");

    let (queue, rx) = WorkQueue::new();
    let handler_ctx = ctx.clone();
    let workers = process(
        queue.clone(),
        rx,
        ctx.config.workers,
        ctx.config.retry.clone(),
        shutdown.clone(),
        move |key| reconcile(key, handler_ctx.clone()),
    );

    let events = watcher(api, watcher::Config::default())
        .default_backoff()
        .for_each(|event| {
            match event {
                Ok(event) => enqueue_event(&queue, event),
                Err(e) => warn!(error = %e, "SimpleMySqlBackup watch error"),
            }
            future::ready(())
        });

    tokio::select! {
        _ = workers => {}
        _ = events => error!("SimpleMySqlBackup watch stream ended"),
        _ = shutdown.cancelled() => {}
    }

    info!("SimpleMySqlBackup controller stopped");
}

#[instrument(skip(ctx), fields(name = %key.name, namespace = %key.namespace))]
async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<()> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let api: Api<SimpleMySqlBackup> = Api::namespaced(ctx.client.clone(), &key.namespace);
    let backup = match api.get_opt(&key.name).await? {
        Some(backup) if backup.metadata.deletion_timestamp.is_none() => backup,
        _ => {
            backup_reconciler::on_deleted(&key.namespace, &key.name);
            return Ok(());
        }
    };

    let result = backup_reconciler::reconcile(&backup, &ctx.client, &ctx.config).await;
    if result.is_err() {
        metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
    }
    result
}
