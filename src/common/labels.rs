//! Labels and annotations used to tag everything this operator creates

use std::collections::BTreeMap;

/// Marks all HelmCharts, HelmReleases and namespaces created by this operator
pub const HELM_PROJECT_OPERATED_LABEL: &str = "helm.cattle.io/helm-project-operated";

/// Marks auto-generated namespaces whose project no longer has any namespaces.
/// A namespace carrying this label is safe to delete.
pub const HELM_PROJECT_OPERATED_ORPHANED_LABEL: &str =
    "helm.cattle.io/helm-project-operator-orphaned";

/// ProjectHelmCharts carrying this label have their HelmCharts and HelmReleases
/// removed until the label is taken off again.
pub const HELM_PROJECT_OPERATED_CLEANUP_LABEL: &str = "helm.cattle.io/helm-project-operator-cleanup";

/// Project identity, applied alongside the configured project label so that
/// selectors keep working on generated namespaces
pub const HELM_PROJECT_OPERATOR_PROJECT_LABEL: &str = "helm.cattle.io/projectId";

/// Identifies a ConfigMap whose data is merged into `status.dashboardValues`.
/// The value is the release name of the chart.
pub const HELM_PROJECT_OPERATOR_DASHBOARD_VALUES_CONFIGMAP_LABEL: &str =
    "helm.cattle.io/dashboard-values-configmap";

/// The Helm API version a HelmChart or HelmRelease belongs to
pub const HELM_PROJECT_OPERATOR_HELM_API_VERSION_LABEL: &str = "helm.cattle.io/helm-api-version";

/// Namespace of the ProjectHelmChart a derived object was generated from
pub const OWNER_NAMESPACE_ANNOTATION: &str = "helm.cattle.io/project-helm-chart-namespace";

/// Name of the ProjectHelmChart a derived object was generated from
pub const OWNER_NAME_ANNOTATION: &str = "helm.cattle.io/project-helm-chart-name";

/// Name format for project registration namespaces
pub const PROJECT_REGISTRATION_NAMESPACE_PREFIX: &str = "cattle-project-";

/// Name of the registration namespace that hosts ProjectHelmCharts for a project
pub fn project_registration_namespace_name(project_id: &str) -> String {
    format!("{}{}", PROJECT_REGISTRATION_NAMESPACE_PREFIX, project_id)
}

/// Label-safe rendering of a Helm API version (`group/version` -> `group.version`)
pub fn helm_api_version_label_value(helm_api_version: &str) -> String {
    helm_api_version.replace('/', ".")
}

/// Labels attached to every resource this operator creates
pub fn common_labels(project_id: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(HELM_PROJECT_OPERATED_LABEL.to_string(), "true".to_string());
    if let Some(id) = project_id.filter(|id| !id.is_empty()) {
        labels.insert(HELM_PROJECT_OPERATOR_PROJECT_LABEL.to_string(), id.to_string());
    }
    labels
}

/// Labels for a project registration namespace
pub fn project_namespace_labels(
    project_id: &str,
    project_label: &str,
    is_orphaned: bool,
) -> BTreeMap<String, String> {
    let mut labels = common_labels(Some(project_id));
    if is_orphaned {
        labels.insert(
            HELM_PROJECT_OPERATED_ORPHANED_LABEL.to_string(),
            "true".to_string(),
        );
    }
    labels.insert(project_label.to_string(), project_id.to_string());
    labels
}

/// Annotations for a project registration namespace
pub fn project_namespace_annotations(
    project_id: &str,
    project_label: &str,
    cluster_id: Option<&str>,
) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    if let Some(cluster_id) = cluster_id.filter(|id| !id.is_empty()) {
        annotations.insert(
            project_label.to_string(),
            format!("{}:{}", cluster_id, project_id),
        );
    }
    annotations
}

/// Labels attached to HelmCharts and HelmReleases
pub fn derived_labels(helm_api_version: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels(None);
    labels.insert(
        HELM_PROJECT_OPERATOR_HELM_API_VERSION_LABEL.to_string(),
        helm_api_version_label_value(helm_api_version),
    );
    labels
}

/// Owner-link annotations pointing back at a ProjectHelmChart
pub fn owner_annotations(namespace: &str, name: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(OWNER_NAMESPACE_ANNOTATION.to_string(), namespace.to_string());
    annotations.insert(OWNER_NAME_ANNOTATION.to_string(), name.to_string());
    annotations
}

/// Whether a label map sets `key` to `"true"`
pub fn is_label_true(labels: &BTreeMap<String, String>, key: &str) -> bool {
    labels.get(key).map(|v| v == "true").unwrap_or(false)
}
