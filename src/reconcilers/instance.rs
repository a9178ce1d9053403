//! SimpleMySql reconciler
//!
//! Turns an instance spec into its managed resource set and converges it:
//! - Spec validation
//! - Credential resolution (adopted secret or generated password)
//! - Storage, workload and endpoint convergence
//! - Backup schedule and phpMyAdmin toggles, including pruning on disable
//! - Status updates

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::{SimpleMySql, SimpleMySqlSpec};
use crate::error::{Error, Result};
use crate::reconcilers::apply::{apply, remove, FIELD_MANAGER};
use crate::reconcilers::schedule;
use crate::resources::{
    backup_cronjob, backup_cronjob_name, credentials_name, credentials_secret, data_claim,
    get_secret, get_secret_opt, get_secret_string, mysql_deployment, mysql_service,
    phpmyadmin_deployment, phpmyadmin_name, phpmyadmin_service, phpmyadmin_url, resolve_password,
    standard_labels, BackupTarget, DatabaseWorkload, Owner, Placement, KEY_DATABASE, MYSQL_PORT,
};

/// Validate the SimpleMySql spec
pub fn validate(instance: &SimpleMySql) -> Result<()> {
    let spec = &instance.spec;

    if spec.database.name.is_empty() {
        return Err(Error::validation("database.name must not be empty"));
    }

    if spec.backup.enabled {
        let Some(s3) = &spec.backup.s3 else {
            return Err(Error::validation("backup is enabled but backup.s3 is missing"));
        };
        let missing = s3.missing_fields();
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "backup is enabled but backup.s3 is missing: {}",
                missing.join(", ")
            )));
        }
        schedule::parse(&spec.backup.schedule)?;
    }

    if let Some(restore) = &spec.restore {
        if restore.s3.secret_ref.as_deref().map_or(true, str::is_empty) {
            return Err(Error::validation("restore requires restore.s3.secretRef"));
        }
    }

    if spec.phpmyadmin.enabled && spec.phpmyadmin.port == 0 {
        return Err(Error::validation("phpmyadmin.port must not be 0"));
    }

    Ok(())
}

/// Credential-related configuration derived before anything is built
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedConfig {
    /// Database name written to the workload environment
    pub db_name: String,
    /// Secret mounted into the workload and used by backups
    pub secret_name: String,
    /// Root password of a generated credential store; None when a secret is adopted
    pub password: Option<String>,
}

impl DerivedConfig {
    /// Adopt an existing secret; its stored database name overrides `database.name`.
    pub fn adopted(spec: &SimpleMySqlSpec, secret_name: &str, secret: Option<&Secret>) -> Self {
        let db_name = secret
            .and_then(|s| get_secret_string(s, KEY_DATABASE).ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| spec.database.name.clone());

        Self {
            db_name,
            secret_name: secret_name.to_string(),
            password: None,
        }
    }

    /// Generate (or reuse the persisted) credential store for `instance`
    pub fn generated(instance: &str, spec: &SimpleMySqlSpec, persisted: Option<&Secret>) -> Self {
        Self {
            db_name: spec.database.name.clone(),
            secret_name: credentials_name(instance),
            password: Some(resolve_password(spec.database.password.as_deref(), persisted)),
        }
    }
}

/// Resolve the credential source of an instance
pub async fn derive_config(instance: &SimpleMySql, client: &Client) -> Result<DerivedConfig> {
    let name = instance.name_any();
    let namespace = instance.namespace().ok_or(Error::MissingObjectKey("namespace"))?;

    match instance.spec.database.existing_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret_name) => {
            let secret = match get_secret(client, secret_name, &namespace).await {
                Ok(secret) => Some(secret),
                Err(e) => {
                    warn!(
                        name = %name,
                        secret = %secret_name,
                        error = %e,
                        "Failed to read existing secret, keeping database.name"
                    );
                    None
                }
            };
            Ok(DerivedConfig::adopted(&instance.spec, secret_name, secret.as_ref()))
        }
        None => {
            let persisted = get_secret_opt(client, &credentials_name(&name), &namespace).await?;
            Ok(DerivedConfig::generated(&name, &instance.spec, persisted.as_ref()))
        }
    }
}

/// Scheduled backup member of the resource set
#[derive(Clone, Debug)]
pub struct ScheduledBackup {
    pub cronjob: CronJob,
    pub next_run: DateTime<Utc>,
}

/// phpMyAdmin member of the resource set
#[derive(Clone, Debug)]
pub struct AdminUi {
    pub deployment: Deployment,
    pub service: Service,
    pub url: String,
}

/// Every object an instance owns, as it should exist in the cluster
#[derive(Clone, Debug)]
pub struct ManagedResourceSet {
    /// Absent when an existing secret is adopted
    pub credentials: Option<Secret>,
    pub storage: PersistentVolumeClaim,
    pub workload: Deployment,
    pub endpoint: Service,
    pub backup_schedule: Option<ScheduledBackup>,
    pub admin_ui: Option<AdminUi>,
}

/// Resource set plus the toggle-off deletions implied by the previous status
#[derive(Clone, Debug)]
pub struct InstancePlan {
    pub owner: Owner,
    pub resources: ManagedResourceSet,
    pub prune_backup_schedule: bool,
    pub prune_admin_ui: bool,
}

/// Derive the target state of an instance. No cluster I/O.
pub fn plan(
    instance: &SimpleMySql,
    derived: &DerivedConfig,
    config: &OperatorConfig,
    now: DateTime<Utc>,
) -> Result<InstancePlan> {
    let owner = Owner::of(instance)?;
    let spec = &instance.spec;
    let labels = standard_labels(&owner.name, "mysql");
    let placement = Placement::from_spec(spec);

    let credentials = derived.password.as_deref().map(|password| {
        credentials_secret(&owner, &derived.db_name, password, spec.callback_url.as_deref())
    });

    let workload = mysql_deployment(
        &owner,
        &DatabaseWorkload {
            secret_name: &derived.secret_name,
            db_name: &derived.db_name,
            labels: &labels,
            resources: spec.resources.as_ref(),
            placement: &placement,
            restore: spec.restore.as_ref(),
        },
        config,
    );

    let backup_schedule = if spec.backup.enabled {
        let s3 = spec
            .backup
            .s3
            .as_ref()
            .ok_or_else(|| Error::validation("backup is enabled but backup.s3 is missing"))?;
        let target = BackupTarget {
            instance: &owner.name,
            credentials_secret: &derived.secret_name,
            s3,
            placement: &placement,
        };
        let cronjob = backup_cronjob(
            &owner,
            &spec.backup.schedule,
            &target,
            &standard_labels(&owner.name, "backup"),
            config,
        );
        let next_run = schedule::next_fire_time(&spec.backup.schedule, now)?;
        Some(ScheduledBackup { cronjob, next_run })
    } else {
        None
    };

    let admin_ui = spec.phpmyadmin.enabled.then(|| AdminUi {
        deployment: phpmyadmin_deployment(&owner, &spec.phpmyadmin, &placement, config),
        service: phpmyadmin_service(&owner, spec.phpmyadmin.port),
        url: phpmyadmin_url(&owner, spec.phpmyadmin.port),
    });

    let prior = instance.status.as_ref();
    let prune_backup_schedule =
        backup_schedule.is_none() && prior.map_or(false, |s| s.next_backup.is_some());
    let prune_admin_ui = admin_ui.is_none() && prior.map_or(false, |s| s.phpmyadmin_url.is_some());

    Ok(InstancePlan {
        resources: ManagedResourceSet {
            credentials,
            storage: data_claim(&owner, &spec.storage, &labels),
            workload,
            endpoint: mysql_service(&owner, &labels),
            backup_schedule,
            admin_ui,
        },
        owner,
        prune_backup_schedule,
        prune_admin_ui,
    })
}

/// Apply a plan in order: credentials, storage, workload, endpoint, backup schedule, admin UI
pub async fn converge(client: &Client, plan: &InstancePlan) -> Result<()> {
    let namespace = plan.owner.namespace.as_str();
    let name = plan.owner.name.as_str();
    let set = &plan.resources;

    if let Some(secret) = &set.credentials {
        apply(&Api::<Secret>::namespaced(client.clone(), namespace), secret).await?;
    }
    apply(&Api::<PersistentVolumeClaim>::namespaced(client.clone(), namespace), &set.storage).await?;
    apply(&Api::<Deployment>::namespaced(client.clone(), namespace), &set.workload).await?;
    apply(&Api::<Service>::namespaced(client.clone(), namespace), &set.endpoint).await?;

    let cronjobs: Api<CronJob> = Api::namespaced(client.clone(), namespace);
    match &set.backup_schedule {
        Some(scheduled) => {
            apply(&cronjobs, &scheduled.cronjob).await?;
        }
        None if plan.prune_backup_schedule => {
            remove(&cronjobs, &backup_cronjob_name(name)).await?;
            info!(name = %name, "Backup disabled, removed backup CronJob");
        }
        None => {}
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    match &set.admin_ui {
        Some(ui) => {
            apply(&deployments, &ui.deployment).await?;
            apply(&services, &ui.service).await?;
        }
        None if plan.prune_admin_ui => {
            remove(&deployments, &phpmyadmin_name(name)).await?;
            remove(&services, &phpmyadmin_name(name)).await?;
            info!(name = %name, "phpMyAdmin disabled, removed its Deployment and Service");
        }
        None => {}
    }

    Ok(())
}

/// Status patch after a successful convergence.
/// Disabled features are written as null so a merge patch clears them.
pub fn running_status(instance: &SimpleMySql, derived: &DerivedConfig, plan: &InstancePlan) -> Value {
    let mut status = Map::new();
    status.insert("phase".into(), json!("Running"));
    status.insert("message".into(), json!("All managed resources converged"));
    status.insert("ready".into(), json!(true));
    status.insert("dbHost".into(), json!(plan.owner.name));
    status.insert("dbPort".into(), json!(MYSQL_PORT.to_string()));
    status.insert("secretName".into(), json!(derived.secret_name));
    status.insert("observedGeneration".into(), json!(instance.metadata.generation));

    match &plan.resources.backup_schedule {
        Some(scheduled) => {
            status.insert("nextBackup".into(), json!(scheduled.next_run));
        }
        None => {
            status.insert("nextBackup".into(), Value::Null);
            status.insert("lastBackup".into(), Value::Null);
        }
    }

    status.insert(
        "phpmyadminUrl".into(),
        plan.resources
            .admin_ui
            .as_ref()
            .map_or(Value::Null, |ui| json!(ui.url)),
    );

    json!({ "status": status })
}

/// Status patch for a failed reconciliation. Only permanent failures record
/// the generation, so transient ones are reconciled again on retry.
pub fn failed_status(instance: &SimpleMySql, error: &Error) -> Value {
    let mut status = json!({
        "status": {
            "phase": "Failed",
            "ready": false,
            "message": error.to_string(),
        }
    });
    if error.is_permanent() {
        status["status"]["observedGeneration"] = json!(instance.metadata.generation);
    }
    status
}

/// True when the current generation was already reconciled
pub fn is_current(instance: &SimpleMySql) -> bool {
    let observed = instance.status.as_ref().and_then(|s| s.observed_generation);
    observed.is_some() && observed == instance.metadata.generation
}

async fn patch_status(api: &Api<SimpleMySql>, name: &str, status: Value) -> Result<()> {
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status))
        .await?;
    Ok(())
}

async fn converge_instance(
    instance: &SimpleMySql,
    client: &Client,
    config: &OperatorConfig,
) -> Result<Value> {
    validate(instance)?;
    let derived = derive_config(instance, client).await?;
    let plan = plan(instance, &derived, config, Utc::now())?;
    converge(client, &plan).await?;
    Ok(running_status(instance, &derived, &plan))
}

/// Reconcile an observed SimpleMySql spec
#[instrument(skip(instance, client, config), fields(name = %instance.name_any(), namespace = instance.namespace()))]
pub async fn reconcile(instance: &SimpleMySql, client: &Client, config: &OperatorConfig) -> Result<()> {
    let name = instance.name_any();
    let namespace = instance.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let api: Api<SimpleMySql> = Api::namespaced(client.clone(), &namespace);

    info!(
        name = %name,
        namespace = %namespace,
        generation = instance.metadata.generation.unwrap_or(0),
        "Reconciling SimpleMySql"
    );

    match converge_instance(instance, client, config).await {
        Ok(status) => {
            patch_status(&api, &name, status).await?;
            info!(name = %name, "SimpleMySql is running");
            Ok(())
        }
        Err(e) => {
            warn!(name = %name, error = %e, permanent = e.is_permanent(), "SimpleMySql reconciliation failed");
            if let Err(patch_err) = patch_status(&api, &name, failed_status(instance, &e)).await {
                error!(name = %name, error = %patch_err, "Failed to record Failed status");
            }
            Err(e)
        }
    }
}

/// Deletion is left to owner references; only record it.
pub fn on_deleted(namespace: &str, name: &str) {
    info!(name = %name, namespace = %namespace, "SimpleMySql deleted, owned resources are garbage collected");
}
