//! Retention sweep for backup records
//!
//! Backup records whose Job completed more than `retentionDays` ago are
//! deleted. Records never move to a terminal phase; they simply disappear.
//! Failures are isolated per record.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::{DeleteParams, ListParams},
    Api, Client, ResourceExt,
};
use tracing::{debug, info, warn};

use crate::crd::SimpleMySqlBackup;
use crate::error::{is_not_found, Result};
use crate::metrics;

/// Completion time of a Job: the `Complete=True` condition's last transition
pub fn completion_time(job: &Job) -> Option<DateTime<Utc>> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Complete" && c.status == "True")
        .and_then(|c| c.last_transition_time.as_ref())
        .map(|t| t.0)
}

/// Outcome of checking a single backup record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepDecision {
    /// The Job has no status yet
    Pending,
    /// The Job has not completed successfully
    Incomplete,
    /// Completed but still inside the retention window
    Retain { age: Duration },
    /// Completed and older than the retention window
    Expire { age: Duration },
}

/// Decide whether a backup record has outlived its retention window
pub fn evaluate(backup: &SimpleMySqlBackup, job: &Job, now: DateTime<Utc>) -> SweepDecision {
    if job.status.is_none() {
        return SweepDecision::Pending;
    }
    let Some(completed) = completion_time(job) else {
        return SweepDecision::Incomplete;
    };

    let age = now - completed;
    let retention = Duration::days(i64::from(backup.spec.retention_days()));
    if age > retention {
        SweepDecision::Expire { age }
    } else {
        SweepDecision::Retain { age }
    }
}

/// Counters for one sweep cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

async fn sweep_one(client: &Client, backup: &SimpleMySqlBackup, now: DateTime<Utc>) -> Result<bool> {
    let name = backup.name_any();
    let Some(namespace) = backup.namespace() else {
        return Ok(false);
    };
    let Some(job_name) = backup.status.as_ref().and_then(|s| s.job_name.clone()) else {
        return Ok(false);
    };

    let jobs: Api<Job> = Api::namespaced(client.clone(), &namespace);
    let Some(job) = jobs.get_opt(&job_name).await? else {
        debug!(name = %name, job = %job_name, "Backup job already gone, skipping");
        return Ok(false);
    };

    match evaluate(backup, &job, now) {
        SweepDecision::Expire { age } => {
            let backups: Api<SimpleMySqlBackup> = Api::namespaced(client.clone(), &namespace);
            match backups.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
            info!(
                name = %name,
                namespace = %namespace,
                age_hours = age.num_hours(),
                retention_days = backup.spec.retention_days(),
                "Deleted expired backup record"
            );
            Ok(true)
        }
        decision => {
            debug!(name = %name, ?decision, "Keeping backup record");
            Ok(false)
        }
    }
}

/// List every backup record cluster-wide and delete the expired ones
pub async fn sweep(client: &Client, now: DateTime<Utc>) -> Result<SweepReport> {
    let api: Api<SimpleMySqlBackup> = Api::all(client.clone());
    let backups = api.list(&ListParams::default()).await?;

    let mut report = SweepReport::default();
    for backup in &backups.items {
        report.examined += 1;
        match sweep_one(client, backup, now).await {
            Ok(true) => report.deleted += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                report.errors += 1;
                metrics::SWEEP_ERRORS.inc();
                warn!(
                    name = %backup.name_any(),
                    namespace = backup.namespace().unwrap_or_default(),
                    error = %e,
                    "Failed to sweep backup record"
                );
            }
        }
    }

    metrics::BACKUPS_EXPIRED.inc_by(report.deleted as f64);
    Ok(report)
}
