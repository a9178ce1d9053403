//! SimpleMySqlBackup reconciler
//!
//! A backup request is submitted exactly once:
//! - Spec validation
//! - Best-effort placement lookup on the referenced instance
//! - One-shot Job submission (or adoption of a Job from an earlier attempt)
//! - Status updates

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::{S3Spec, SimpleMySql, SimpleMySqlBackup};
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::apply::{post_params, FIELD_MANAGER};
use crate::resources::{
    backup_job, credentials_name, new_backup_id, standard_labels, BackupTarget, Owner, Placement,
};

/// Label linking a Job to the backup request that submitted it
pub const BACKUP_REQUEST_LABEL: &str = "mysql.subat.cn/backup-request";

/// Label carrying the backup identifier on the Job
pub const BACKUP_ID_LABEL: &str = "mysql.subat.cn/backup-id";

/// Validate the SimpleMySqlBackup spec
pub fn validate(backup: &SimpleMySqlBackup) -> Result<()> {
    if backup.spec.mysql_ref.as_deref().map_or(true, str::is_empty) {
        return Err(Error::validation("mysqlRef is required"));
    }

    let Some(s3) = &backup.spec.s3 else {
        return Err(Error::validation("s3 is required"));
    };
    let missing = s3.missing_fields();
    if !missing.is_empty() {
        return Err(Error::validation(format!("s3 is missing: {}", missing.join(", "))));
    }

    Ok(())
}

/// Backup requests are immutable; any recorded phase means the request was handled.
pub fn is_submitted(backup: &SimpleMySqlBackup) -> bool {
    backup
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some()
}

/// Where a backup reads from, resolved from the referenced instance when it exists
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackupSource {
    pub instance: String,
    pub credentials_secret: String,
    pub placement: Placement,
}

impl BackupSource {
    pub fn resolve(mysql_ref: &str, instance: Option<&SimpleMySql>) -> Self {
        let credentials_secret = instance
            .and_then(|i| {
                i.status
                    .as_ref()
                    .and_then(|s| s.secret_name.clone())
                    .or_else(|| i.spec.database.existing_secret.clone())
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| credentials_name(mysql_ref));

        Self {
            instance: mysql_ref.to_string(),
            credentials_secret,
            placement: instance
                .map(|i| Placement::from_spec(&i.spec))
                .unwrap_or_default(),
        }
    }
}

fn job_labels(backup: &SimpleMySqlBackup, source: &BackupSource, backup_id: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(&source.instance, "backup");
    labels.insert(BACKUP_REQUEST_LABEL.to_string(), backup.name_any());
    labels.insert(BACKUP_ID_LABEL.to_string(), backup_id.to_string());
    labels
}

/// Build the one-shot Job for a validated backup request
pub fn build_job(
    backup: &SimpleMySqlBackup,
    source: &BackupSource,
    backup_id: &str,
    config: &OperatorConfig,
) -> Result<Job> {
    let owner = Owner::of(backup)?;
    let s3: &S3Spec = backup
        .spec
        .s3
        .as_ref()
        .ok_or_else(|| Error::validation("s3 is required"))?;

    let target = BackupTarget {
        instance: &source.instance,
        credentials_secret: &source.credentials_secret,
        s3,
        placement: &source.placement,
    };

    Ok(backup_job(
        &owner,
        backup_id,
        &target,
        backup.spec.ttl_seconds_after_finished(),
        &job_labels(backup, source, backup_id),
        config,
    ))
}

/// Status patch describing a submitted Job
pub fn submitted_status(mysql_ref: &str, job: &Job, now: DateTime<Utc>) -> Value {
    let backup_id = job.labels().get(BACKUP_ID_LABEL).cloned();
    let start_time = job
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or(now);

    json!({
        "status": {
            "phase": "Running",
            "message": format!("Backup job created for {}", mysql_ref),
            "backupId": backup_id,
            "startTime": start_time,
            "jobName": job.name_any(),
        }
    })
}

fn failed_status(error: &Error) -> Value {
    json!({
        "status": {
            "phase": "Failed",
            "message": error.to_string(),
        }
    })
}

/// A Job from an earlier attempt of this exact request, ignoring Jobs left
/// behind by a deleted request of the same name
pub fn adoptable_job(backup: &SimpleMySqlBackup, jobs: Vec<Job>) -> Option<Job> {
    let uid = backup.uid()?;
    jobs.into_iter()
        .find(|job| job.owner_references().iter().any(|r| r.uid == uid))
}

async fn lookup_instance(client: &Client, namespace: &str, mysql_ref: &str) -> Option<SimpleMySql> {
    let api: Api<SimpleMySql> = Api::namespaced(client.clone(), namespace);
    match api.get_opt(mysql_ref).await {
        Ok(Some(instance)) => Some(instance),
        Ok(None) => {
            warn!(mysql_ref = %mysql_ref, "Referenced SimpleMySql not found, submitting backup without placement");
            None
        }
        Err(e) => {
            warn!(mysql_ref = %mysql_ref, error = %e, "Failed to look up SimpleMySql, submitting backup without placement");
            None
        }
    }
}

async fn fail(
    api: &Api<SimpleMySqlBackup>,
    name: &str,
    namespace: &str,
    error: Error,
) -> Result<()> {
    error!(name = %name, error = %error, "Backup request failed");
    metrics::BACKUPS_TOTAL
        .with_label_values(&["failure", namespace])
        .inc();
    if let Err(patch_err) = api
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(failed_status(&error)))
        .await
    {
        error!(name = %name, error = %patch_err, "Failed to record Failed status");
    }
    Err(error)
}

/// Reconcile an observed SimpleMySqlBackup
#[instrument(skip(backup, client, config), fields(name = %backup.name_any(), namespace = backup.namespace()))]
pub async fn reconcile(backup: &SimpleMySqlBackup, client: &Client, config: &OperatorConfig) -> Result<()> {
    let name = backup.name_any();
    let namespace = backup.namespace().ok_or(Error::MissingObjectKey("namespace"))?;

    if is_submitted(backup) {
        debug!(name = %name, "Backup already submitted, nothing to do");
        return Ok(());
    }

    let api: Api<SimpleMySqlBackup> = Api::namespaced(client.clone(), &namespace);

    if let Err(e) = validate(backup) {
        return fail(&api, &name, &namespace, e).await;
    }
    let mysql_ref = backup.spec.mysql_ref.clone().unwrap_or_default();

    info!(name = %name, mysql_ref = %mysql_ref, "Submitting backup");

    let instance = lookup_instance(client, &namespace, &mysql_ref).await;
    let source = BackupSource::resolve(&mysql_ref, instance.as_ref());

    // A Job from an earlier attempt whose status write failed is adopted.
    let jobs: Api<Job> = Api::namespaced(client.clone(), &namespace);
    let selector = format!("{}={}", BACKUP_REQUEST_LABEL, name);
    let existing = jobs.list(&ListParams::default().labels(&selector)).await?;

    let job = match adoptable_job(backup, existing.items) {
        Some(job) => {
            info!(name = %name, job = %job.name_any(), "Adopting existing backup job");
            job
        }
        None => {
            let backup_id = new_backup_id(Utc::now());
            let target = match build_job(backup, &source, &backup_id, config) {
                Ok(job) => job,
                Err(e) => return fail(&api, &name, &namespace, e).await,
            };
            match jobs.create(&post_params(), &target).await {
                Ok(job) => job,
                Err(e) => {
                    let error = Error::convergence("Job", target.name_any(), e);
                    return fail(&api, &name, &namespace, error).await;
                }
            }
        }
    };

    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(submitted_status(&mysql_ref, &job, Utc::now())),
    )
    .await?;

    metrics::BACKUPS_TOTAL
        .with_label_values(&["submitted", &namespace])
        .inc();
    info!(name = %name, job = %job.name_any(), "Backup job submitted");
    Ok(())
}

/// Object-storage artifacts outlive the record; only record the deletion.
pub fn on_deleted(namespace: &str, name: &str) {
    info!(name = %name, namespace = %namespace, "SimpleMySqlBackup deleted, stored backup is kept");
}
