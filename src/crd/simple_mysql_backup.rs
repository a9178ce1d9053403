//! SimpleMySqlBackup Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::S3Spec;

/// Retention applied by the sweeper when `retentionDays` is unset
pub const DEFAULT_RETENTION_DAYS: u32 = 3;

/// SimpleMySqlBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mysql.subat.cn",
    version = "v1",
    kind = "SimpleMySqlBackup",
    plural = "simplemysqlbackups",
    singular = "simplemysqlbackup",
    shortname = "smyb",
    namespaced,
    status = "SimpleMySqlBackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Backup ID", "type": "string", "jsonPath": ".status.backupId"}"#,
    printcolumn = r#"{"name": "Job", "type": "string", "jsonPath": ".status.jobName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMySqlBackupSpec {
    /// Name of the SimpleMySql instance to back up (same namespace)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_ref: Option<String>,

    /// Object storage target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,

    /// Seconds the finished Job is kept before Kubernetes removes it
    /// (defaults to the retention window plus one day)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,

    /// Days this record is kept after the Job completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

impl SimpleMySqlBackupSpec {
    pub fn retention_days(&self) -> u32 {
        self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS)
    }

    /// Job TTL; the default outlives the retention window so the sweeper can
    /// still observe the Job's completion time.
    pub fn ttl_seconds_after_finished(&self) -> i32 {
        self.ttl_seconds_after_finished.unwrap_or_else(|| {
            let days = i64::from(self.retention_days()) + 1;
            i32::try_from(days * 86_400).unwrap_or(i32::MAX)
        })
    }
}

/// SimpleMySqlBackup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMySqlBackupStatus {
    /// Current phase (Running, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Identifier of this backup in object storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,

    /// When the Job was submitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Name of the backup Job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
}
