//! Periodic retention sweep
//!
//! Runs independently of the controllers on `OperatorConfig::sweep_interval`.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::controllers::Context;
use crate::metrics;
use crate::reconcilers::retention;

/// Sweep expired backup records until `shutdown` is cancelled
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_secs = ctx.config.sweep_interval.as_secs(),
        "Starting retention sweeper"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        metrics::RETENTION_SWEEPS.inc();
        match retention::sweep(&ctx.client, Utc::now()).await {
            Ok(report) => info!(
                examined = report.examined,
                deleted = report.deleted,
                skipped = report.skipped,
                errors = report.errors,
                "Retention sweep finished"
            ),
            Err(e) => {
                metrics::SWEEP_ERRORS.inc();
                error!(error = %e, "Retention sweep failed to list backups");
            }
        }
    }

    info!("Retention sweeper stopped");
}
