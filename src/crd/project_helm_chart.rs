//! ProjectHelmChart Custom Resource Definition

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Free-form nested values tree
pub type GenericMap = serde_json::Map<String, serde_json::Value>;

/// Status reported once derived resources have been generated
pub const STATUS_DEPLOYED: &str = "Deployed";

/// Status reported when the request cannot be turned into derived resources
pub const STATUS_FAILED: &str = "Failed";

/// Status reported while the cleanup label is present
pub const STATUS_CLEANED_UP: &str = "CleanedUp";

/// ProjectHelmChart resource specification
///
/// Submitted by a tenant into its project registration namespace to request a
/// deployment of the operator's embedded chart.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "helm.cattle.io",
    version = "v1alpha1",
    kind = "ProjectHelmChart",
    plural = "projecthelmcharts",
    singular = "projecthelmchart",
    namespaced,
    status = "ProjectHelmChartStatus",
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.status"}"#,
    printcolumn = r#"{"name": "System Namespace", "type": "string", "jsonPath": ".status.systemNamespace"}"#,
    printcolumn = r#"{"name": "Release Namespace", "type": "string", "jsonPath": ".status.releaseNamespace"}"#,
    printcolumn = r#"{"name": "Release Name", "type": "string", "jsonPath": ".status.releaseName"}"#,
    printcolumn = r#"{"name": "Target Namespaces", "type": "string", "jsonPath": ".status.targetNamespaces"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectHelmChartSpec {
    /// Helm API version served by the operator that should handle this request
    #[serde(default)]
    pub helm_api_version: String,

    /// Selects the namespaces targeted by this project. Ignored when the
    /// operator infers projects from a project label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_namespace_selector: Option<LabelSelector>,

    /// Values passed to the chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<GenericMap>,
}

/// ProjectHelmChart status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectHelmChartStatus {
    /// Current status (Deployed, Failed, CleanedUp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// Namespace holding the generated HelmChart and HelmRelease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_namespace: Option<String>,

    /// Namespace the release is installed into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_namespace: Option<String>,

    /// Name of the installed release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Namespaces resolved as targets of this project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,

    /// Values published by the deployed chart for dashboards
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub dashboard_values: Option<GenericMap>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
