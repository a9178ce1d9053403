//! Backup CronJob and one-shot Job builders

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::OperatorConfig;
use crate::crd::S3Spec;

use super::database::{data_volume, env, env_from_secret, mount};
use super::meta::{backup_cronjob_name, image_pull_secrets, Owner, Placement};

const BACKUP_BACKOFF_LIMIT: i32 = 3;
const DATA_VOLUME: &str = "mysql-data";
const MAX_NAME_LEN: usize = 63;
const ID_SUFFIX_LEN: usize = 5;

/// What a backup container needs to know about its target instance
#[derive(Clone, Debug)]
pub struct BackupTarget<'a> {
    /// Instance whose data claim is mounted
    pub instance: &'a str,
    /// Credential store injected as environment
    pub credentials_secret: &'a str,
    pub s3: &'a S3Spec,
    pub placement: &'a Placement,
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn backup_container(name: &str, target: &BackupTarget<'_>, config: &OperatorConfig) -> Container {
    let s3 = target.s3;
    let mut env_vars = vec![
        env("S3_BUCKET", s3.bucket.clone().unwrap_or_default()),
        env("S3_ENDPOINT", s3.endpoint.clone().unwrap_or_default()),
        env("S3_PREFIX", s3.prefix_or_default()),
    ];
    if let Some(keep_days) = s3.keep_days {
        env_vars.push(env("S3_KEEP_DAYS", keep_days.to_string()));
    }

    let mut env_from = vec![env_from_secret(target.credentials_secret)];
    if let Some(secret_ref) = s3.secret_ref.as_deref() {
        env_from.push(env_from_secret(secret_ref));
    }

    Container {
        name: name.to_string(),
        image: Some(config.backup_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env_vars),
        env_from: Some(env_from),
        resources: Some(ResourceRequirements {
            requests: Some(quantities("100m", "128Mi")),
            limits: Some(quantities("200m", "256Mi")),
            ..Default::default()
        }),
        volume_mounts: Some(vec![mount(DATA_VOLUME, "/var/lib/mysql")]),
        ..Default::default()
    }
}

fn backup_pod_template(
    container: Container,
    restart_policy: &str,
    target: &BackupTarget<'_>,
    labels: &BTreeMap<String, String>,
    config: &OperatorConfig,
) -> PodTemplateSpec {
    let mut pod = PodSpec {
        containers: vec![container],
        restart_policy: Some(restart_policy.to_string()),
        volumes: Some(vec![data_volume(DATA_VOLUME, target.instance)]),
        image_pull_secrets: image_pull_secrets(config),
        ..Default::default()
    };
    target.placement.apply_to(&mut pod);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(pod),
    }
}

/// Build the `<name>-backup` CronJob. Runs never overlap.
pub fn backup_cronjob(
    owner: &Owner,
    schedule: &str,
    target: &BackupTarget<'_>,
    labels: &BTreeMap<String, String>,
    config: &OperatorConfig,
) -> CronJob {
    let container = backup_container("mysql-backup", target, config);

    CronJob {
        metadata: owner.child_meta(backup_cronjob_name(&owner.name), labels.clone()),
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(3),
            failed_jobs_history_limit: Some(1),
            suspend: Some(false),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(BACKUP_BACKOFF_LIMIT),
                    template: backup_pod_template(container, "OnFailure", target, labels, config),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// New backup identifier: second-resolution timestamp plus a random suffix,
/// so two requests within the same second never collide.
pub fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Job name `<backup>-<backup id>`, truncating the backup name to stay a valid label value
pub fn backup_job_name(backup_name: &str, backup_id: &str) -> String {
    let budget = MAX_NAME_LEN.saturating_sub(backup_id.len() + 1);
    let base: String = backup_name.chars().take(budget).collect();
    format!("{}-{}", base.trim_end_matches('-'), backup_id)
}

/// Build a one-shot backup Job owned by the backup request
pub fn backup_job(
    owner: &Owner,
    backup_id: &str,
    target: &BackupTarget<'_>,
    ttl_seconds_after_finished: i32,
    labels: &BTreeMap<String, String>,
    config: &OperatorConfig,
) -> Job {
    let container = backup_container("backup", target, config);

    Job {
        metadata: owner.child_meta(backup_job_name(&owner.name, backup_id), labels.clone()),
        spec: Some(JobSpec {
            backoff_limit: Some(BACKUP_BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(ttl_seconds_after_finished),
            template: backup_pod_template(container, "Never", target, labels, config),
            ..Default::default()
        }),
        ..Default::default()
    }
}
