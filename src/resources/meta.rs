//! Naming, labels, ownership and placement shared by every builder

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, LocalObjectReference, PodSpec, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::config::OperatorConfig;
use crate::crd::SimpleMySqlSpec;
use crate::error::{Error, Result};

/// Port the MySQL server listens on
pub const MYSQL_PORT: i32 = 3306;

const APP_LABEL: &str = "simplemysql";
const MANAGED_BY: &str = "mysql-operator";

/// Storage claim holding the data directory
pub fn data_claim_name(instance: &str) -> String {
    format!("{instance}-data")
}

/// Credential store generated for an instance
pub fn credentials_name(instance: &str) -> String {
    format!("{instance}-credentials")
}

/// Scheduled backup job
pub fn backup_cronjob_name(instance: &str) -> String {
    format!("{instance}-backup")
}

/// phpMyAdmin workload and endpoint
pub fn phpmyadmin_name(instance: &str) -> String {
    format!("{instance}-phpmyadmin")
}

/// Standard labels for managed resources
pub fn standard_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_LABEL.to_string()),
        ("instance".to_string(), name.to_string()),
        ("component".to_string(), component.to_string()),
        ("managed-by".to_string(), MANAGED_BY.to_string()),
    ])
}

/// Build a controller OwnerReference for any CRD object
pub fn controller_owner_ref<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Identity of the custom resource that owns a set of managed objects
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    pub name: String,
    pub namespace: String,
    pub reference: OwnerReference,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self> {
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey("name"))?;
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        Ok(Self {
            name,
            namespace,
            reference: controller_owner_ref(obj),
        })
    }

    /// Metadata for a child object in the owner's namespace
    pub fn child_meta(&self, name: impl Into<String>, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.reference.clone()]),
            ..Default::default()
        }
    }
}

/// Pull secrets attached to every pod when one is configured
pub fn image_pull_secrets(config: &OperatorConfig) -> Option<Vec<LocalObjectReference>> {
    config.image_pull_secret.as_ref().map(|name| {
        vec![LocalObjectReference {
            name: name.clone(),
        }]
    })
}

/// Scheduling constraints copied from an instance onto its pods
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Placement {
    pub node_selector: Option<BTreeMap<String, String>>,
    pub affinity: Option<Affinity>,
    pub tolerations: Option<Vec<Toleration>>,
}

impl Placement {
    pub fn from_spec(spec: &SimpleMySqlSpec) -> Self {
        Self {
            node_selector: spec.node_selector.clone(),
            affinity: spec.affinity.clone(),
            tolerations: spec.tolerations.clone(),
        }
    }

    /// Only the node selector; used by pods that merely need to land on the same node pool
    pub fn node_selector_only(&self) -> Self {
        Self {
            node_selector: self.node_selector.clone(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node_selector.is_none() && self.affinity.is_none() && self.tolerations.is_none()
    }

    pub fn apply_to(&self, pod: &mut PodSpec) {
        pod.node_selector = self.node_selector.clone();
        pod.affinity = self.affinity.clone();
        pod.tolerations = self.tolerations.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_from_instance_name() {
        assert_eq!(data_claim_name("shop"), "shop-data");
        assert_eq!(credentials_name("shop"), "shop-credentials");
        assert_eq!(backup_cronjob_name("shop"), "shop-backup");
        assert_eq!(phpmyadmin_name("shop"), "shop-phpmyadmin");
    }

    #[test]
    fn standard_labels_identify_instance_and_component() {
        let labels = standard_labels("shop", "mysql");
        assert_eq!(labels["app"], "simplemysql");
        assert_eq!(labels["instance"], "shop");
        assert_eq!(labels["component"], "mysql");
        assert_eq!(labels["managed-by"], "mysql-operator");
    }

    #[test]
    fn pull_secret_is_attached_only_when_configured() {
        let mut config = OperatorConfig::default();
        assert!(image_pull_secrets(&config).is_none());

        config.image_pull_secret = Some("regcred".to_string());
        let secrets = image_pull_secrets(&config).unwrap();
        assert_eq!(secrets[0].name, "regcred");
    }
}
