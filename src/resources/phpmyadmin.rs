//! phpMyAdmin workload and endpoint builders

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::OperatorConfig;
use crate::crd::PhpMyAdminSpec;

use super::database::env;
use super::meta::{image_pull_secrets, phpmyadmin_name, Owner, Placement, MYSQL_PORT};

const HTTP_PORT: i32 = 80;

fn labels(owner: &Owner) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), phpmyadmin_name(&owner.name)),
        ("instance".to_string(), owner.name.clone()),
        ("component".to_string(), "phpmyadmin".to_string()),
        ("managed-by".to_string(), "mysql-operator".to_string()),
    ])
}

fn selector(owner: &Owner) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), phpmyadmin_name(&owner.name))])
}

fn default_resources() -> ResourceRequirements {
    let q = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(q("100m", "128Mi")),
        limits: Some(q("200m", "256Mi")),
        ..Default::default()
    }
}

/// In-cluster URL reported in the instance status
pub fn phpmyadmin_url(owner: &Owner, port: u16) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        phpmyadmin_name(&owner.name),
        owner.namespace,
        port
    )
}

/// Build the `<name>-phpmyadmin` Deployment pointing at the instance service
pub fn phpmyadmin_deployment(
    owner: &Owner,
    spec: &PhpMyAdminSpec,
    placement: &Placement,
    config: &OperatorConfig,
) -> Deployment {
    let container = Container {
        name: "phpmyadmin".to_string(),
        image: Some(config.phpmyadmin_image()),
        ports: Some(vec![ContainerPort {
            container_port: HTTP_PORT,
            ..Default::default()
        }]),
        env: Some(vec![
            env("PMA_HOST", owner.name.clone()),
            env("PMA_PORT", MYSQL_PORT.to_string()),
            env("MEMORY_LIMIT", "1024M"),
            env("UPLOAD_LIMIT", "2048M"),
            env("PHP_UPLOAD_MAX_FILESIZE", "2000M"),
            env("PHP_POST_MAX_SIZE", "2000M"),
        ]),
        resources: Some(spec.resources.clone().unwrap_or_else(default_resources)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        containers: vec![container],
        image_pull_secrets: image_pull_secrets(config),
        ..Default::default()
    };
    placement.node_selector_only().apply_to(&mut pod);

    Deployment {
        metadata: owner.child_meta(phpmyadmin_name(&owner.name), labels(owner)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector(owner)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(owner)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the cluster-internal `<name>-phpmyadmin` Service
pub fn phpmyadmin_service(owner: &Owner, port: u16) -> Service {
    Service {
        metadata: owner.child_meta(phpmyadmin_name(&owner.name), labels(owner)),
        spec: Some(ServiceSpec {
            selector: Some(selector(owner)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: i32::from(port),
                target_port: Some(IntOrString::Int(HTTP_PORT)),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
