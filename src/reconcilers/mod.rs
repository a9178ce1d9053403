//! Reconcilers for the SimpleMySql CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Validating CRD specs
//! - Converging managed resources
//! - Updating resource status
//! - Sweeping expired backup records

pub mod apply;
pub mod backup;
pub mod instance;
pub mod retention;
pub mod schedule;
