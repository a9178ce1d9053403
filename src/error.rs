//! Error types for the SimpleMySql Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (status writes, watches, lookups)
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A create-or-update or delete of a managed resource was rejected
    #[error("Failed to converge {kind} '{name}': {source}")]
    Convergence {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cron schedule could not be parsed
    #[error("Invalid cron schedule '{schedule}': {reason}")]
    Schedule { schedule: String, reason: String },

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Secret key not found
    #[error("Secret key '{key}' not found in secret '{secret}'")]
    SecretKeyNotFound { secret: String, key: String },

    /// Object is missing name or namespace
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Wrap a cluster write failure for a managed resource
    pub fn convergence(kind: impl Into<String>, name: impl Into<String>, source: kube::Error) -> Self {
        Error::Convergence {
            kind: kind.into(),
            name: name.into(),
            source,
        }
    }

    /// Permanent errors are surfaced in status and never retried by the work queue.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Schedule { .. }
                | Error::Convergence { .. }
                | Error::MissingObjectKey(_)
        )
    }
}

/// True when the API server answered 404 for the request.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// True when the API server answered 409 AlreadyExists for a create.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}
