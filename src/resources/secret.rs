//! Credential store builder and secret access helpers

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{Api, Client};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{is_not_found, Error, Result};

use super::meta::{credentials_name, standard_labels, Owner, MYSQL_PORT};

/// Keys written into the credential store
pub const KEY_HOST: &str = "MYSQL_HOST";
pub const KEY_PORT: &str = "MYSQL_PORT";
pub const KEY_USER: &str = "MYSQL_USER";
pub const KEY_PASSWORD: &str = "MYSQL_PASSWORD";
pub const KEY_DATABASE: &str = "MYSQL_DATABASE";
pub const KEY_ROOT_HOST: &str = "MYSQL_ROOT_HOST";
pub const KEY_CALLBACK_URL: &str = "CALLBACK_URL";

const GENERATED_PASSWORD_LEN: usize = 24;

/// Generate a random alphanumeric password
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Pick the root password: explicit spec value, then the persisted one, then a fresh one.
pub fn resolve_password(spec_password: Option<&str>, existing: Option<&Secret>) -> String {
    if let Some(password) = spec_password.filter(|p| !p.is_empty()) {
        return password.to_string();
    }
    existing
        .and_then(|secret| get_secret_string(secret, KEY_PASSWORD).ok())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(generate_password)
}

/// Build the `<name>-credentials` secret
pub fn credentials_secret(
    owner: &Owner,
    db_name: &str,
    password: &str,
    callback_url: Option<&str>,
) -> Secret {
    let data: BTreeMap<String, ByteString> = BTreeMap::from([
        (KEY_HOST, owner.name.clone()),
        (KEY_PORT, MYSQL_PORT.to_string()),
        (KEY_USER, "root".to_string()),
        (KEY_PASSWORD, password.to_string()),
        (KEY_DATABASE, db_name.to_string()),
        (KEY_ROOT_HOST, "%".to_string()),
        (KEY_CALLBACK_URL, callback_url.unwrap_or_default().to_string()),
    ])
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
    .collect();

    Secret {
        metadata: owner.child_meta(
            credentials_name(&owner.name),
            standard_labels(&owner.name, "credentials"),
        ),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Fetch a secret from Kubernetes
pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets.get(name).await.map_err(|e| {
        if is_not_found(&e) {
            Error::SecretNotFound(format!("{}/{}", namespace, name))
        } else {
            Error::Kube(e)
        }
    })
}

/// Fetch a secret, returning None when it does not exist
pub async fn get_secret_opt(client: &Client, name: &str, namespace: &str) -> Result<Option<Secret>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    Ok(secrets.get_opt(name).await?)
}

/// Get a string value from a secret
pub fn get_secret_string(secret: &Secret, key: &str) -> Result<String> {
    let missing = || Error::SecretKeyNotFound {
        secret: secret.metadata.name.clone().unwrap_or_default(),
        key: key.to_string(),
    };

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(missing)?;

    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::config(format!("Invalid UTF-8 in secret key '{}': {}", key, e)))
}
