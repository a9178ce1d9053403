//! SimpleMySql Kubernetes Operator
//!
//! This operator runs single-instance MySQL databases in Kubernetes using
//! Custom Resource Definitions (CRDs): storage, workload, endpoint, scheduled
//! S3 backups, an optional phpMyAdmin, and one-shot backup requests whose
//! records are swept after a retention window.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod resources;

pub use config::OperatorConfig;
pub use error::{Error, Result};
