//! Builders converting CRD specs into the Kubernetes objects the operator manages
//!
//! Every builder is a pure function of its inputs and the operator
//! configuration; none of them talk to the API server except the secret
//! lookup helpers in `secret`.

mod backup_job;
mod database;
mod meta;
mod phpmyadmin;
mod secret;
mod storage;

pub use backup_job::*;
pub use database::{mysql_deployment, mysql_service, DatabaseWorkload};
pub use meta::*;
pub use phpmyadmin::*;
pub use secret::*;
pub use storage::*;
