//! Helm Project Operator
//!
//! Turns ProjectHelmCharts submitted into project registration namespaces into
//! HelmCharts and HelmReleases in the operator's system namespace, scoping
//! each deployment to the namespaces of one project.

pub mod adapters;
pub mod common;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod leader;
pub mod metrics;
pub mod reconcilers;
pub mod resolver;

pub use error::{Error, Result};
