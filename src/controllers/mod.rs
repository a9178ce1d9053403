//! Kubernetes controllers for the SimpleMySql CRDs
//!
//! Each controller watches one kind, feeds the events into a keyed
//! [`WorkQueue`] and reconciles with a bounded number of workers. The
//! retention sweeper runs independently on a fixed interval.

mod backup_controller;
mod instance_controller;
mod queue;
mod retention_sweeper;

pub use backup_controller::run as run_backup_controller;
pub use instance_controller::run as run_instance_controller;
pub use queue::{enqueue_event, process, ObjectKey, RetryPolicy, WorkQueue};
pub use retention_sweeper::run as run_retention_sweeper;

use kube::Client;

use crate::config::OperatorConfig;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }
}
