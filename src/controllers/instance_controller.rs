//! SimpleMySql controller
//!
//! Watches SimpleMySql resources and triggers reconciliation.

use std::sync::Arc;

use futures::{future, StreamExt};
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::queue::{enqueue_event, process, ObjectKey, WorkQueue};
use crate::controllers::Context;
use crate::crd::SimpleMySql;
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::instance as instance_reconciler;

const KIND: &str = "SimpleMySql";

/// Run the SimpleMySql controller until `shutdown` is cancelled
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let api: Api<SimpleMySql> = Api::all(ctx.client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("SimpleMySql CRD not installed: {}", e);
        return;
    }

    info!(workers = ctx.config.workers, "Starting SimpleMySql controller");

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
                Err(e) => warn!(error = %e, "SimpleMySql watch error"),
            }
            future::ready(())
        });

    tokio::select! {
        _ = workers => {}
        _ = events => error!("SimpleMySql watch stream ended"),
        _ = shutdown.cancelled() => {}
    }

    info!("SimpleMySql controller stopped");
}

/// Reconcile the current state of one SimpleMySql
#[instrument(skip(ctx), fields(name = %key.name, namespace = %key.namespace))]
async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<()> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let api: Api<SimpleMySql> = Api::namespaced(ctx.client.clone(), &key.namespace);
    let Some(instance) = api.get_opt(&key.name).await? else {
        instance_reconciler::on_deleted(&key.namespace, &key.name);
        return Ok(());
    };

    if instance.metadata.deletion_timestamp.is_some() {
        instance_reconciler::on_deleted(&key.namespace, &key.name);
        return Ok(());
    }

    if instance_reconciler::is_current(&instance) {
        debug!(name = %key.name, "Generation already reconciled");
        return Ok(());
    }

    let result = instance_reconciler::reconcile(&instance, &ctx.client, &ctx.config).await;
    if result.is_err() {
        metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
    }
    result
}
