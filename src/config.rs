//! Operator configuration
//!
//! Built once at process start from the environment and passed by reference
//! into every builder and reconciler.

use std::str::FromStr;
use std::time::Duration;

use crate::controllers::RetryPolicy;
use crate::error::{Error, Result};

const DEFAULT_REGISTRY: &str = "harbor.subat.cn/subat-mysql-operator";
const DEFAULT_VERSION: &str = "8.0.35-1";

const MYSQL_IMAGE: &str = "percona-server";
const PHPMYADMIN_IMAGE: &str = "phpmyadmin";
const BACKUP_IMAGE: &str = "backup";
const RESTORE_IMAGE: &str = "restore";

/// Runtime configuration shared by all controllers
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Registry prefix for every image the operator schedules
    pub registry: String,
    /// Image tag
    pub version: String,
    /// Optional image pull secret attached to every pod
    pub image_pull_secret: Option<String>,
    /// Interval between retention sweeps
    pub sweep_interval: Duration,
    /// Concurrent reconciliations per resource kind
    pub workers: usize,
    /// Retry policy for transient reconcile failures
    pub retry: RetryPolicy,
    /// Port of the metrics/health server
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            image_pull_secret: None,
            sweep_interval: Duration::from_secs(3600),
            workers: 4,
            retry: RetryPolicy::default(),
            metrics_port: 8080,
        }
    }
}

impl OperatorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let registry = lookup("REGISTRY").unwrap_or(defaults.registry);
        let version = lookup("VERSION").unwrap_or(defaults.version);
        let image_pull_secret = lookup("IMAGE_PULL_SECRET").filter(|s| !s.is_empty());

        let sweep_interval = parse_var::<u64>(&lookup, "RETENTION_SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        if sweep_interval.is_zero() {
            return Err(Error::config("RETENTION_SWEEP_INTERVAL_SECS must be greater than 0"));
        }

        let workers = parse_var::<usize>(&lookup, "RECONCILE_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(Error::config("RECONCILE_WORKERS must be greater than 0"));
        }

        let mut retry = defaults.retry;
        if let Some(max_attempts) = parse_var::<u32>(&lookup, "RECONCILE_MAX_ATTEMPTS")? {
            retry.max_attempts = max_attempts;
        }

        let metrics_port = parse_var::<u16>(&lookup, "METRICS_PORT")?.unwrap_or(defaults.metrics_port);

        Ok(Self {
            registry,
            version,
            image_pull_secret,
            sweep_interval,
            workers,
            retry,
            metrics_port,
        })
    }

    pub fn mysql_image(&self) -> String {
        self.image(MYSQL_IMAGE)
    }

    pub fn phpmyadmin_image(&self) -> String {
        self.image(PHPMYADMIN_IMAGE)
    }

    pub fn backup_image(&self) -> String {
        self.image(BACKUP_IMAGE)
    }

    pub fn restore_image(&self) -> String {
        self.image(RESTORE_IMAGE)
    }

    fn image(&self, name: &str) -> String {
        format!("{}/{}:{}", self.registry, name, self.version)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("Invalid value '{}' for {}: {}", raw, key, e))),
    }
}
