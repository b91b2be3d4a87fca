//! Builders for project registration namespaces and their ConfigMap

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::common::labels::{
    common_labels, helm_api_version_label_value, project_namespace_annotations,
    project_namespace_labels, project_registration_namespace_name,
};
use crate::common::Options;
use crate::resolver::RegistrationNamespace;

/// Build a project registration namespace.
///
/// Returns `None` when no project label is configured, since registration
/// namespaces only exist in that mode.
pub fn build_registration_namespace(
    registration: &RegistrationNamespace,
    opts: &Options,
) -> Option<Namespace> {
    let project_label = opts.project_label.as_deref()?;
    let project_id = registration.project_id.as_str();

    let annotations =
        project_namespace_annotations(project_id, project_label, opts.cluster_id.as_deref());

    Some(Namespace {
        metadata: ObjectMeta {
            name: Some(project_registration_namespace_name(project_id)),
            labels: Some(project_namespace_labels(
                project_id,
                project_label,
                registration.orphaned,
            )),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Name of the values/questions ConfigMap for the served Helm API version
pub fn config_map_name(opts: &Options) -> String {
    helm_api_version_label_value(&opts.helm_api_version)
}

/// Build the ConfigMap holding the chart's default values and questions
pub fn build_config_map(namespace: &str, project_id: Option<&str>, opts: &Options) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("values.yaml".to_string(), opts.values_yaml.clone());
    data.insert("questions.yaml".to_string(), opts.questions_yaml.clone());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(opts)),
            namespace: Some(namespace.to_string()),
            labels: Some(common_labels(project_id)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
