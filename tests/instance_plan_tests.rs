//! Integration tests for instance planning
//!
//! Planning is pure, so these tests cover idempotence, toggles, restore
//! wiring, placement and naming without a cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{Secret, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::Value;
use simple_mysql_operator::crd::{
    BackupSpec, DatabaseSpec, PhpMyAdminSpec, RestoreSpec, S3Spec, SimpleMySql, SimpleMySqlSpec,
    SimpleMySqlStatus,
};
use simple_mysql_operator::reconcilers::instance::{
    failed_status, is_current, plan, running_status, DerivedConfig, InstancePlan,
};
use simple_mysql_operator::resources::KEY_PASSWORD;
use simple_mysql_operator::{Error, OperatorConfig};

// ============================================================================
// Test Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap()
}

fn s3() -> S3Spec {
    S3Spec {
        bucket: Some("db-backups".to_string()),
        endpoint: Some("http://minio.storage:9000".to_string()),
        secret_ref: Some("s3-credentials".to_string()),
        prefix: Some("shop".to_string()),
        keep_days: Some(7),
    }
}

fn instance(spec: SimpleMySqlSpec) -> SimpleMySql {
    SimpleMySql {
        metadata: ObjectMeta {
            name: Some("shop".to_string()),
            namespace: Some("apps".to_string()),
            uid: Some("0b6e1a8c-uid".to_string()),
            generation: Some(2),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn with_backup(spec: SimpleMySqlSpec) -> SimpleMySqlSpec {
    SimpleMySqlSpec {
        backup: BackupSpec {
            enabled: true,
            schedule: "0 2 * * *".to_string(),
            s3: Some(s3()),
        },
        ..spec
    }
}

fn with_admin_ui(spec: SimpleMySqlSpec) -> SimpleMySqlSpec {
    SimpleMySqlSpec {
        phpmyadmin: PhpMyAdminSpec {
            enabled: true,
            port: 8081,
            resources: None,
        },
        ..spec
    }
}

fn generated(obj: &SimpleMySql) -> DerivedConfig {
    DerivedConfig::generated("shop", &obj.spec, None)
}

fn plan_for(obj: &SimpleMySql, derived: &DerivedConfig) -> InstancePlan {
    plan(obj, derived, &OperatorConfig::default(), now()).unwrap()
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap()
}

fn persisted_secret(password: &str) -> Secret {
    Secret {
        data: Some(BTreeMap::from([(
            KEY_PASSWORD.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

// ============================================================================
// Naming & Ownership
// ============================================================================

#[test]
fn managed_resources_are_named_after_the_instance() {
    let obj = instance(with_admin_ui(with_backup(SimpleMySqlSpec::default())));
    let plan = plan_for(&obj, &generated(&obj));
    let set = &plan.resources;

    assert_eq!(set.storage.metadata.name.as_deref(), Some("shop-data"));
    assert_eq!(
        set.credentials.as_ref().unwrap().metadata.name.as_deref(),
        Some("shop-credentials")
    );
    assert_eq!(set.workload.metadata.name.as_deref(), Some("shop"));
    assert_eq!(set.endpoint.metadata.name.as_deref(), Some("shop"));

    let scheduled = set.backup_schedule.as_ref().unwrap();
    assert_eq!(scheduled.cronjob.metadata.name.as_deref(), Some("shop-backup"));

    let ui = set.admin_ui.as_ref().unwrap();
    assert_eq!(ui.deployment.metadata.name.as_deref(), Some("shop-phpmyadmin"));
    assert_eq!(ui.service.metadata.name.as_deref(), Some("shop-phpmyadmin"));
}

#[test]
fn every_managed_resource_is_owned_by_the_instance() {
    let obj = instance(with_admin_ui(with_backup(SimpleMySqlSpec::default())));
    let set = plan_for(&obj, &generated(&obj)).resources;

    let metas = [
        &set.credentials.as_ref().unwrap().metadata,
        &set.storage.metadata,
        &set.workload.metadata,
        &set.endpoint.metadata,
        &set.backup_schedule.as_ref().unwrap().cronjob.metadata,
        &set.admin_ui.as_ref().unwrap().deployment.metadata,
        &set.admin_ui.as_ref().unwrap().service.metadata,
    ];
    for meta in metas {
        let owner = &meta.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "SimpleMySql");
        assert_eq!(owner.uid, "0b6e1a8c-uid");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(meta.namespace.as_deref(), Some("apps"));
    }
}

#[test]
fn planning_requires_a_namespace() {
    let mut obj = instance(SimpleMySqlSpec::default());
    obj.metadata.namespace = None;
    let err = plan(&obj, &generated(&obj), &OperatorConfig::default(), now()).unwrap_err();
    assert!(matches!(err, Error::MissingObjectKey("namespace")));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn replanning_the_same_spec_is_identical() {
    let obj = instance(with_admin_ui(with_backup(SimpleMySqlSpec::default())));
    let first = plan_for(&obj, &generated(&obj));

    // Second reconcile sees the credential store persisted by the first
    let password = first.resources.credentials.as_ref().map(|s| {
        String::from_utf8(s.data.as_ref().unwrap()[KEY_PASSWORD].0.clone()).unwrap()
    });
    let persisted = persisted_secret(password.as_deref().unwrap());
    let second_derived = DerivedConfig::generated("shop", &obj.spec, Some(&persisted));
    let second = plan_for(&obj, &second_derived);

    let (a, b) = (&first.resources, &second.resources);
    assert_eq!(to_json(&a.credentials), to_json(&b.credentials));
    assert_eq!(to_json(&a.storage), to_json(&b.storage));
    assert_eq!(to_json(&a.workload), to_json(&b.workload));
    assert_eq!(to_json(&a.endpoint), to_json(&b.endpoint));
    assert_eq!(
        to_json(&a.backup_schedule.as_ref().unwrap().cronjob),
        to_json(&b.backup_schedule.as_ref().unwrap().cronjob)
    );
    assert_eq!(
        to_json(&a.admin_ui.as_ref().unwrap().deployment),
        to_json(&b.admin_ui.as_ref().unwrap().deployment)
    );
}

#[test]
fn spec_password_is_used_verbatim() {
    let spec = SimpleMySqlSpec {
        database: DatabaseSpec {
            password: Some("hunter2hunter2".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let derived = DerivedConfig::generated("shop", &spec, Some(&persisted_secret("old")));
    assert_eq!(derived.password.as_deref(), Some("hunter2hunter2"));
    assert_eq!(derived.secret_name, "shop-credentials");
}

#[test]
fn adopted_secret_overrides_database_name_and_skips_credentials() {
    let spec = SimpleMySqlSpec {
        database: DatabaseSpec {
            name: "spec_db".to_string(),
            password: None,
            existing_secret: Some("legacy-db".to_string()),
        },
        ..Default::default()
    };
    let secret = Secret {
        data: Some(BTreeMap::from([(
            "MYSQL_DATABASE".to_string(),
            ByteString(b"legacy".to_vec()),
        )])),
        ..Default::default()
    };

    let derived = DerivedConfig::adopted(&spec, "legacy-db", Some(&secret));
    assert_eq!(derived.db_name, "legacy");
    assert_eq!(derived.secret_name, "legacy-db");
    assert!(derived.password.is_none());

    let obj = instance(spec.clone());
    let plan = plan_for(&obj, &derived);
    assert!(plan.resources.credentials.is_none());

    let pod = plan.resources.workload.spec.unwrap().template.spec.unwrap();
    let env_volume = pod.volumes.unwrap().into_iter().find(|v| v.name == "env").unwrap();
    assert_eq!(env_volume.secret.unwrap().secret_name.as_deref(), Some("legacy-db"));

    // Unreadable secret keeps database.name
    let degraded = DerivedConfig::adopted(&spec, "legacy-db", None);
    assert_eq!(degraded.db_name, "spec_db");
}

// ============================================================================
// Workload
// ============================================================================

#[test]
fn workload_is_single_replica_and_recreated() {
    let obj = instance(SimpleMySqlSpec::default());
    let deployment = plan_for(&obj, &generated(&obj)).resources.workload;
    let spec = deployment.spec.unwrap();

    assert_eq!(spec.replicas, Some(1));
    assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));

    let pod = spec.template.spec.unwrap();
    let container = &pod.containers[0];
    assert_eq!(
        container.image.as_deref(),
        Some("harbor.subat.cn/subat-mysql-operator/percona-server:8.0.35-1")
    );
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 3306);

    let env = container.env.as_ref().unwrap();
    assert!(env
        .iter()
        .any(|e| e.name == "MYSQL_ROOT_PASSWORD_FILE" && e.value.as_deref() == Some("/env/MYSQL_PASSWORD")));
    assert!(env
        .iter()
        .any(|e| e.name == "MYSQL_DATABASE" && e.value.as_deref() == Some("mysql")));
    assert!(pod.init_containers.is_none());
}

#[test]
fn restore_adds_exactly_one_init_step_with_backup_id() {
    let spec = SimpleMySqlSpec {
        restore: Some(RestoreSpec {
            backup_id: Some("20261016020000-k3x9q".to_string()),
            s3: s3(),
        }),
        ..Default::default()
    };
    let obj = instance(spec);
    let pod = plan_for(&obj, &generated(&obj))
        .resources
        .workload
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();

    let init = pod.init_containers.unwrap();
    assert_eq!(init.len(), 1);
    assert_eq!(init[0].name, "restore");

    let env = init[0].env.as_ref().unwrap();
    assert!(env
        .iter()
        .any(|e| e.name == "BACKUP_ID" && e.value.as_deref() == Some("20261016020000-k3x9q")));
    assert!(env
        .iter()
        .any(|e| e.name == "S3_BUCKET" && e.value.as_deref() == Some("db-backups")));

    let env_from = init[0].env_from.as_ref().unwrap();
    assert_eq!(
        env_from[0].secret_ref.as_ref().unwrap().name,
        "s3-credentials"
    );
    assert_eq!(
        init[0].volume_mounts.as_ref().unwrap()[0].mount_path,
        "/app/restore"
    );
}

#[test]
fn restore_without_backup_id_restores_latest() {
    let spec = SimpleMySqlSpec {
        restore: Some(RestoreSpec {
            backup_id: None,
            s3: s3(),
        }),
        ..Default::default()
    };
    let obj = instance(spec);
    let pod = plan_for(&obj, &generated(&obj))
        .resources
        .workload
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();

    let init = pod.init_containers.unwrap();
    assert_eq!(init.len(), 1);
    assert!(!init[0].env.as_ref().unwrap().iter().any(|e| e.name == "BACKUP_ID"));
}

#[test]
fn placement_is_copied_to_workload_and_backup_schedule() {
    let spec = SimpleMySqlSpec {
        node_selector: Some(BTreeMap::from([("pool".to_string(), "db".to_string())])),
        tolerations: Some(vec![Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("db".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        }]),
        ..with_backup(SimpleMySqlSpec::default())
    };
    let obj = instance(with_admin_ui(spec));
    let set = plan_for(&obj, &generated(&obj)).resources;

    let workload_pod = set.workload.spec.unwrap().template.spec.unwrap();
    assert_eq!(workload_pod.node_selector.as_ref().unwrap()["pool"], "db");
    assert_eq!(workload_pod.tolerations.as_ref().unwrap().len(), 1);

    let cron_pod = set
        .backup_schedule
        .unwrap()
        .cronjob
        .spec
        .unwrap()
        .job_template
        .spec
        .unwrap()
        .template
        .spec
        .unwrap();
    assert_eq!(cron_pod.node_selector.as_ref().unwrap()["pool"], "db");
    assert_eq!(cron_pod.tolerations.as_ref().unwrap().len(), 1);

    // phpMyAdmin only follows the node selector
    let ui_pod = set.admin_ui.unwrap().deployment.spec.unwrap().template.spec.unwrap();
    assert_eq!(ui_pod.node_selector.as_ref().unwrap()["pool"], "db");
    assert!(ui_pod.tolerations.is_none());
}

// ============================================================================
// Backup schedule
// ============================================================================

#[test]
fn backup_schedule_never_overlaps_and_reports_next_run() {
    let obj = instance(with_backup(SimpleMySqlSpec::default()));
    let scheduled = plan_for(&obj, &generated(&obj)).resources.backup_schedule.unwrap();

    assert_eq!(scheduled.next_run, Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap());

    let spec = scheduled.cronjob.spec.unwrap();
    assert_eq!(spec.schedule, "0 2 * * *");
    assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
    assert_eq!(spec.successful_jobs_history_limit, Some(3));
    assert_eq!(spec.failed_jobs_history_limit, Some(1));
    assert_eq!(spec.suspend, Some(false));

    let job = spec.job_template.spec.unwrap();
    assert_eq!(job.backoff_limit, Some(3));
    let pod = job.template.spec.unwrap();
    assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));

    let container = &pod.containers[0];
    let env = container.env.as_ref().unwrap();
    assert!(env
        .iter()
        .any(|e| e.name == "S3_KEEP_DAYS" && e.value.as_deref() == Some("7")));
    assert!(env
        .iter()
        .any(|e| e.name == "S3_PREFIX" && e.value.as_deref() == Some("shop")));
    let secrets: Vec<_> = container
        .env_from
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| e.secret_ref.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(secrets, vec!["shop-credentials", "s3-credentials"]);

    // The backup selector must not match the database service
    let labels = scheduled_labels(&obj);
    assert_eq!(labels["component"], "backup");
}

fn scheduled_labels(obj: &SimpleMySql) -> BTreeMap<String, String> {
    plan_for(obj, &generated(obj))
        .resources
        .backup_schedule
        .unwrap()
        .cronjob
        .metadata
        .labels
        .unwrap()
}

// ============================================================================
// Toggles
// ============================================================================

#[test]
fn disabled_features_are_pruned_only_after_being_reported() {
    let mut obj = instance(SimpleMySqlSpec::default());
    let plan = plan_for(&obj, &generated(&obj));
    assert!(!plan.prune_backup_schedule);
    assert!(!plan.prune_admin_ui);

    obj.status = Some(SimpleMySqlStatus {
        next_backup: Some(now()),
        phpmyadmin_url: Some("http://shop-phpmyadmin.apps.svc.cluster.local:8081".to_string()),
        ..Default::default()
    });
    let plan = plan_for(&obj, &generated(&obj));
    assert!(plan.resources.backup_schedule.is_none());
    assert!(plan.resources.admin_ui.is_none());
    assert!(plan.prune_backup_schedule);
    assert!(plan.prune_admin_ui);
}

#[test]
fn enabled_features_are_never_pruned() {
    let mut obj = instance(with_admin_ui(with_backup(SimpleMySqlSpec::default())));
    obj.status = Some(SimpleMySqlStatus {
        next_backup: Some(now()),
        phpmyadmin_url: Some("http://old".to_string()),
        ..Default::default()
    });
    let plan = plan_for(&obj, &generated(&obj));
    assert!(!plan.prune_backup_schedule);
    assert!(!plan.prune_admin_ui);
}

#[test]
fn running_status_reports_enabled_features() {
    let obj = instance(with_admin_ui(with_backup(SimpleMySqlSpec::default())));
    let derived = generated(&obj);
    let status = running_status(&obj, &derived, &plan_for(&obj, &derived));
    let status = &status["status"];

    assert_eq!(status["phase"], "Running");
    assert_eq!(status["ready"], true);
    assert_eq!(status["dbHost"], "shop");
    assert_eq!(status["dbPort"], "3306");
    assert_eq!(status["secretName"], "shop-credentials");
    assert_eq!(status["observedGeneration"], 2);
    assert_eq!(status["nextBackup"], "2026-10-18T02:00:00Z");
    assert!(status.get("lastBackup").is_none());
    assert_eq!(
        status["phpmyadminUrl"],
        "http://shop-phpmyadmin.apps.svc.cluster.local:8081"
    );
}

#[test]
fn running_status_clears_disabled_features() {
    let obj = instance(SimpleMySqlSpec::default());
    let derived = generated(&obj);
    let status = running_status(&obj, &derived, &plan_for(&obj, &derived));
    let status = &status["status"];

    assert_eq!(status["nextBackup"], Value::Null);
    assert_eq!(status["lastBackup"], Value::Null);
    assert_eq!(status["phpmyadminUrl"], Value::Null);
    assert!(status.as_object().unwrap().contains_key("nextBackup"));
    assert!(status.as_object().unwrap().contains_key("phpmyadminUrl"));
}

// ============================================================================
// Failure status
// ============================================================================

#[test]
fn permanent_failures_record_the_generation() {
    let obj = instance(SimpleMySqlSpec::default());
    let status = failed_status(&obj, &Error::validation("backup is enabled but backup.s3 is missing"));

    assert_eq!(status["status"]["phase"], "Failed");
    assert_eq!(status["status"]["ready"], false);
    assert!(status["status"]["message"].as_str().unwrap().contains("backup.s3"));
    assert_eq!(status["status"]["observedGeneration"], 2);
}

#[test]
fn transient_failures_leave_the_generation_unobserved() {
    let obj = instance(SimpleMySqlSpec::default());
    let status = failed_status(&obj, &Error::config("api server unavailable"));
    assert!(status["status"].get("observedGeneration").is_none());
}

#[test]
fn reconciled_generation_is_current() {
    let mut obj = instance(SimpleMySqlSpec::default());
    assert!(!is_current(&obj));

    obj.status = Some(SimpleMySqlStatus {
        observed_generation: Some(1),
        ..Default::default()
    });
    assert!(!is_current(&obj));

    obj.status = Some(SimpleMySqlStatus {
        observed_generation: Some(2),
        ..Default::default()
    });
    assert!(is_current(&obj));
}
