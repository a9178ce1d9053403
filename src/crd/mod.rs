//! Custom Resource Definitions for the SimpleMySql Operator

mod simple_mysql;
mod simple_mysql_backup;

pub use simple_mysql::*;
pub use simple_mysql_backup::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&SimpleMySql::crd())?,
        serde_yaml::to_string(&SimpleMySqlBackup::crd())?,
    ])
}
