//! Custom Resource Definitions used by the Helm Project Operator
//!
//! `ProjectHelmChart` is owned by this operator. `HelmChart` and `HelmRelease`
//! belong to the helm-controller and helm-locker collaborators; only the
//! fields this operator writes are modelled.

mod helm_chart;
mod helm_release;
mod project_helm_chart;

pub use helm_chart::*;
pub use helm_release::*;
pub use project_helm_chart::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&ProjectHelmChart::crd()).unwrap()]
}
