//! Reconciliation logic for ProjectHelmCharts and project namespaces

pub mod apply;
pub mod namespace;
pub mod project_helm_chart;
pub mod resync;
