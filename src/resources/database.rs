//! MySQL workload and endpoint builders

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, ResourceRequirements, SecretEnvSource, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::OperatorConfig;
use crate::crd::RestoreSpec;

use super::meta::{data_claim_name, image_pull_secrets, Owner, Placement, MYSQL_PORT};

const DATA_VOLUME: &str = "data";
const ENV_VOLUME: &str = "env";

/// Inputs of the MySQL workload derived by the instance reconciler
#[derive(Clone, Debug)]
pub struct DatabaseWorkload<'a> {
    pub secret_name: &'a str,
    pub db_name: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    pub resources: Option<&'a ResourceRequirements>,
    pub placement: &'a Placement,
    pub restore: Option<&'a RestoreSpec>,
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn env_from_secret(name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn data_volume(volume_name: &str, instance: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: data_claim_name(instance),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn mount(volume_name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: volume_name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Build the single-replica MySQL Deployment named after the instance
pub fn mysql_deployment(owner: &Owner, workload: &DatabaseWorkload<'_>, config: &OperatorConfig) -> Deployment {
    let container = Container {
        name: "mysql".to_string(),
        image: Some(config.mysql_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: MYSQL_PORT,
            ..Default::default()
        }]),
        env: Some(vec![
            env("MYSQL_DATABASE", workload.db_name),
            env("MYSQL_ROOT_PASSWORD_FILE", "/env/MYSQL_PASSWORD"),
        ]),
        volume_mounts: Some(vec![
            mount(DATA_VOLUME, "/var/lib/mysql"),
            mount(ENV_VOLUME, "/env"),
        ]),
        resources: workload.resources.cloned(),
        ..Default::default()
    };

    let init_containers = workload
        .restore
        .and_then(|restore| restore_container(restore, config))
        .map(|c| vec![c]);

    let mut pod = PodSpec {
        containers: vec![container],
        init_containers,
        volumes: Some(vec![
            data_volume(DATA_VOLUME, &owner.name),
            Volume {
                name: ENV_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(workload.secret_name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        image_pull_secrets: image_pull_secrets(config),
        ..Default::default()
    };
    workload.placement.apply_to(&mut pod);

    Deployment {
        metadata: owner.child_meta(owner.name.clone(), workload.labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(workload.labels.clone()),
                ..Default::default()
            },
            // The data volume is single-writer: never run two pods at once.
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(workload.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Init container restoring the data directory from object storage.
/// Returns None without an s3 secret reference; the reconciler rejects that case earlier.
fn restore_container(restore: &RestoreSpec, config: &OperatorConfig) -> Option<Container> {
    let s3 = &restore.s3;
    let secret_ref = s3.secret_ref.as_deref().filter(|s| !s.is_empty())?;

    let mut env_vars = vec![
        env("S3_BUCKET", s3.bucket.clone().unwrap_or_default()),
        env("S3_ENDPOINT", s3.endpoint.clone().unwrap_or_default()),
        env("S3_PREFIX", s3.prefix_or_default()),
    ];
    if let Some(backup_id) = restore.backup_id.as_deref().filter(|id| !id.is_empty()) {
        env_vars.push(env("BACKUP_ID", backup_id));
    }

    Some(Container {
        name: "restore".to_string(),
        image: Some(config.restore_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env_vars),
        env_from: Some(vec![env_from_secret(secret_ref)]),
        volume_mounts: Some(vec![mount(DATA_VOLUME, "/app/restore")]),
        ..Default::default()
    })
}

/// Build the ClusterIP Service exposing MySQL under the instance name
pub fn mysql_service(owner: &Owner, labels: &BTreeMap<String, String>) -> Service {
    Service {
        metadata: owner.child_meta(owner.name.clone(), labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some("mysql".to_string()),
                port: MYSQL_PORT,
                target_port: Some(IntOrString::Int(MYSQL_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
