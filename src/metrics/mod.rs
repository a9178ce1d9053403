//! Prometheus metrics for the SimpleMySql Operator
//!
//! This module exposes metrics for monitoring operator health and performance.

mod prometheus;

pub use prometheus::*;
