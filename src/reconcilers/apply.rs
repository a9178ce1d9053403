//! Idempotent create-or-update of managed resources
//!
//! `apply` reads the object, creates it when absent and otherwise replaces it
//! wholesale. Immutable kinds are only ever created. Races with other writers
//! ("already exists" on create, "not found" on replace) fall through to the
//! other branch; every other API failure propagates as a convergence error.

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{is_already_exists, is_not_found, Error, Result};
use crate::metrics;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "simple-mysql-operator";

/// A Kubernetes kind the operator converges
pub trait Managed:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Objects of this kind are left untouched once they exist
    const IMMUTABLE: bool = false;
}

impl Managed for Secret {}
impl Managed for Deployment {}
impl Managed for Service {}
impl Managed for CronJob {}
impl Managed for PersistentVolumeClaim {
    const IMMUTABLE: bool = true;
}

/// Create/replace parameters carrying the operator field manager
pub(crate) fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.to_string()),
    }
}

/// Converge `target` and return the object as stored plus whether it was created
pub async fn apply<K: Managed>(api: &Api<K>, target: &K) -> Result<(K, bool)> {
    let name = target.name_any();
    let kind = K::kind(&()).to_string();

    let result = match api.get_opt(&name).await {
        Ok(Some(existing)) if K::IMMUTABLE => Ok((existing, false)),
        Ok(Some(_)) => replace_or_create(api, &name, target).await,
        Ok(None) => create_or_update(api, &name, target).await,
        Err(e) => Err(e),
    };

    let (applied, created) = result.map_err(|e| Error::convergence(&kind, &name, e))?;

    let outcome = match (created, K::IMMUTABLE) {
        (true, _) => "created",
        (false, true) => "unchanged",
        (false, false) => "updated",
    };
    metrics::APPLIED_RESOURCES
        .with_label_values(&[kind.as_str(), outcome])
        .inc();
    debug!(kind = %kind, name = %name, outcome, "Applied resource");

    Ok((applied, created))
}

async fn create_or_update<K: Managed>(
    api: &Api<K>,
    name: &str,
    target: &K,
) -> std::result::Result<(K, bool), kube::Error> {
    match api.create(&post_params(), target).await {
        Ok(created) => Ok((created, true)),
        Err(e) if is_already_exists(&e) => {
            if K::IMMUTABLE {
                api.get(name).await.map(|existing| (existing, false))
            } else {
                api.replace(name, &post_params(), target)
                    .await
                    .map(|replaced| (replaced, false))
            }
        }
        Err(e) => Err(e),
    }
}

async fn replace_or_create<K: Managed>(
    api: &Api<K>,
    name: &str,
    target: &K,
) -> std::result::Result<(K, bool), kube::Error> {
    match api.replace(name, &post_params(), target).await {
        Ok(replaced) => Ok((replaced, false)),
        Err(e) if is_not_found(&e) => api
            .create(&post_params(), target)
            .await
            .map(|created| (created, true)),
        Err(e) => Err(e),
    }
}

/// Delete a managed resource; returns false when it was already gone
pub async fn remove<K: Managed>(api: &Api<K>, name: &str) -> Result<bool> {
    let params = DeleteParams {
        grace_period_seconds: Some(5),
        ..DeleteParams::foreground()
    };

    match api.delete(name, &params).await {
        Ok(_) => {
            debug!(kind = %K::kind(&()), name = %name, "Deleted resource");
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(Error::convergence(K::kind(&()), name, e)),
    }
}
