//! HelmChart resource consumed by the helm-controller

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Instructs the helm-controller to run a chart install or upgrade job
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "helm.cattle.io",
    version = "v1",
    kind = "HelmChart",
    plural = "helmcharts",
    singular = "helmchart",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartSpec {
    /// Chart reference
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,

    /// Namespace the release is installed into
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,

    /// Image of the job that runs helm
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_image: String,

    /// Base64-encoded chart archive
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart_content: String,

    /// values.yaml passed to helm
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values_content: String,
}
