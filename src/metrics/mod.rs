//! Prometheus metrics for the Helm Project Operator
//!
//! Exposes reconcile counters, registration namespace and leadership gauges,
//! plus health endpoints.

pub mod prometheus;

pub use prometheus::*;
