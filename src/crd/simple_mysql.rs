//! SimpleMySql Custom Resource Definition

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SimpleMySql resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mysql.subat.cn",
    version = "v1",
    kind = "SimpleMySql",
    plural = "simplemysqls",
    singular = "simplemysql",
    shortname = "smy",
    namespaced,
    status = "SimpleMySqlStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#,
    printcolumn = r#"{"name": "Next Backup", "type": "string", "jsonPath": ".status.nextBackup"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMySqlSpec {
    /// Database and credential configuration
    #[serde(default)]
    pub database: DatabaseSpec,

    /// URL the backup image calls after each backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    /// Node selector for the database and its backup jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Affinity rules for the database pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations for the database pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Data volume configuration
    #[serde(default)]
    pub storage: StorageSpec,

    /// Resource requests and limits for the MySQL container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Scheduled backup configuration
    #[serde(default)]
    pub backup: BackupSpec,

    /// phpMyAdmin admin UI configuration
    #[serde(default)]
    pub phpmyadmin: PhpMyAdminSpec,

    /// Restore the data volume from a backup before first start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreSpec>,
}

/// Database credential configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Database name created on first start
    #[serde(default = "default_database_name")]
    pub name: String,

    /// Root password (generated when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Adopt an existing credentials secret instead of generating one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_secret: Option<String>,
}

impl Default for DatabaseSpec {
    fn default() -> Self {
        Self {
            name: default_database_name(),
            password: None,
            existing_secret: None,
        }
    }
}

fn default_database_name() -> String {
    "mysql".to_string()
}

/// Data volume configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Requested size (e.g., "10Gi")
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Storage class name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            size: default_storage_size(),
            storage_class: None,
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

/// Scheduled backup configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Enable the backup CronJob
    #[serde(default)]
    pub enabled: bool,

    /// Five-field cron schedule, evaluated in UTC
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,

    /// Object storage target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,
}

impl Default for BackupSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_backup_schedule(),
            s3: None,
        }
    }
}

fn default_backup_schedule() -> String {
    "0 2 * * *".to_string()
}

/// S3-compatible object storage target
///
/// Mandatory fields are optional here so that a missing value surfaces as a
/// status failure instead of a rejected watch event.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    /// Bucket name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Endpoint URL (MinIO, Ceph, AWS)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Secret holding the access credentials, injected as environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Path prefix within the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Days the backup image keeps objects in the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_days: Option<u32>,
}

impl S3Spec {
    /// Prefix used when none is configured
    pub const DEFAULT_PREFIX: &'static str = "default";

    /// Names of mandatory fields that are unset or empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("bucket", &self.bucket),
            ("endpoint", &self.endpoint),
            ("secretRef", &self.secret_ref),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(field, _)| field)
        .collect()
    }

    pub fn prefix_or_default(&self) -> &str {
        self.prefix.as_deref().unwrap_or(Self::DEFAULT_PREFIX)
    }
}

/// phpMyAdmin admin UI configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhpMyAdminSpec {
    /// Deploy phpMyAdmin next to the database
    #[serde(default)]
    pub enabled: bool,

    /// Service port
    #[serde(default = "default_phpmyadmin_port")]
    pub port: u16,

    /// Resource requests and limits (defaults to 100m/128Mi -> 200m/256Mi)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl Default for PhpMyAdminSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_phpmyadmin_port(),
            resources: None,
        }
    }
}

fn default_phpmyadmin_port() -> u16 {
    8080
}

/// Restore source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Backup to restore (latest when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,

    /// Object storage holding the backup
    #[serde(default)]
    pub s3: S3Spec,
}

/// SimpleMySql status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMySqlStatus {
    /// Current phase (Running, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Whether all managed resources converged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// In-cluster host of the database service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,

    /// Database service port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_port: Option<String>,

    /// Secret holding the connection credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Next scheduled backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_backup: Option<DateTime<Utc>>,

    /// Last completed backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,

    /// In-cluster URL of phpMyAdmin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phpmyadmin_url: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
