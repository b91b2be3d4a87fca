//! Integration tests for ProjectHelmChart reconciliation
//!
//! These tests verify that ProjectHelmCharts are turned into the expected
//! HelmCharts, HelmReleases and statuses without talking to a cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, Time,
};
use kube::runtime::reflector::ObjectRef;
use serde_json::{json, Value};

use helm_project_operator::adapters::helm_chart_builder::DEFAULT_JOB_IMAGE;
use helm_project_operator::common::labels::{
    HELM_PROJECT_OPERATED_CLEANUP_LABEL, HELM_PROJECT_OPERATED_LABEL,
    HELM_PROJECT_OPERATOR_HELM_API_VERSION_LABEL, OWNER_NAMESPACE_ANNOTATION,
    OWNER_NAME_ANNOTATION,
};
use helm_project_operator::common::Options;
use helm_project_operator::crd::{
    GenericMap, ProjectHelmChart, ProjectHelmChartSpec, ProjectHelmChartStatus,
    STATUS_CLEANED_UP, STATUS_DEPLOYED, STATUS_FAILED,
};
use helm_project_operator::reconcilers::project_helm_chart::{
    chart_name, dashboard_values, failed_status, status_patch, ProjectHelmChartReconciler,
    MAX_NUMBER_OF_CHARACTERS,
};
use helm_project_operator::reconcilers::resync::resolve_owner;
use helm_project_operator::resolver::{
    LabelProjectGetter, NamespaceUpdate, ProjectGetter, SingleNamespaceProjectGetter,
};
use helm_project_operator::{Error, Result};

// ============================================================================
// Test Helpers
// ============================================================================

const SYSTEM_NAMESPACE: &str = "cattle-helm-system";
const HELM_API_VERSION: &str = "dummy.cattle.io/v1alpha1";
const PROJECT_LABEL: &str = "project.io/id";

/// Treats a fixed set of namespaces as registration namespaces
struct StaticProjectGetter {
    registration_namespaces: Vec<String>,
    targets: Vec<String>,
}

impl ProjectGetter for StaticProjectGetter {
    fn is_project_registration_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.registration_namespaces.iter().any(|ns| ns == namespace))
    }

    fn get_target_project_namespaces(&self, _: &ProjectHelmChart) -> Result<Vec<String>> {
        Ok(self.targets.clone())
    }

    fn on_namespace_change(&self, _: &Namespace) -> NamespaceUpdate {
        NamespaceUpdate::default()
    }

    fn on_namespace_remove(&self, _: &Namespace) -> NamespaceUpdate {
        NamespaceUpdate::default()
    }

    fn on_initial_sync(&self) -> NamespaceUpdate {
        NamespaceUpdate::default()
    }
}

fn options() -> Options {
    Options {
        helm_api_version: HELM_API_VERSION.to_string(),
        release_name: "dummy".to_string(),
        chart_content: "Y2hhcnQtY29udGVudA==".to_string(),
        system_namespaces: vec![SYSTEM_NAMESPACE.to_string()],
        ..Default::default()
    }
}

fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn project_helm_chart(namespace: &str, name: &str) -> ProjectHelmChart {
    ProjectHelmChart {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: ProjectHelmChartSpec {
            helm_api_version: HELM_API_VERSION.to_string(),
            project_namespace_selector: None,
            values: None,
        },
        status: None,
    }
}

fn static_reconciler(registration: &str, targets: &[&str], opts: Options) -> ProjectHelmChartReconciler {
    let getter = Arc::new(StaticProjectGetter {
        registration_namespaces: vec![registration.to_string()],
        targets: targets.iter().map(|t| t.to_string()).collect(),
    });
    ProjectHelmChartReconciler::new(SYSTEM_NAMESPACE, Arc::new(opts), getter)
}

/// Label-driven reconciler with `ns-a` and `ns-b` in project `p1`
fn multi_tenant_reconciler() -> (ProjectHelmChartReconciler, Arc<LabelProjectGetter>) {
    let getter = Arc::new(LabelProjectGetter::new(
        PROJECT_LABEL,
        None,
        &[SYSTEM_NAMESPACE.to_string()],
    ));
    getter.on_namespace_change(&namespace("ns-a", &[(PROJECT_LABEL, "p1")]));
    getter.on_namespace_change(&namespace("ns-b", &[(PROJECT_LABEL, "p1")]));
    getter.on_initial_sync();

    let opts = Options {
        project_label: Some(PROJECT_LABEL.to_string()),
        ..options()
    };
    let reconciler =
        ProjectHelmChartReconciler::new(SYSTEM_NAMESPACE, Arc::new(opts), getter.clone());
    (reconciler, getter)
}

fn values_of(content: &str) -> Value {
    serde_yaml::from_str(content).expect("values content should be valid YAML")
}

fn map(value: Value) -> GenericMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

// ============================================================================
// Scenario Tests
// ============================================================================

#[test]
fn test_single_tenant_scenario() {
    let reconciler = static_reconciler("acme", &["acme"], options());
    let request = project_helm_chart("acme", "frontend");

    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();

    let helm_chart = generated.resources.helm_chart.expect("HelmChart expected");
    assert_eq!(helm_chart.metadata.namespace.as_deref(), Some(SYSTEM_NAMESPACE));
    assert_eq!(helm_chart.metadata.name.as_deref(), Some("acme-frontend"));
    assert_eq!(helm_chart.spec.target_namespace, "acme");

    let helm_release = generated.resources.helm_release.expect("HelmRelease expected");
    assert_eq!(helm_release.metadata.namespace.as_deref(), Some(SYSTEM_NAMESPACE));
    assert_eq!(helm_release.spec.release.namespace, "acme");
    assert_eq!(helm_release.spec.release.name, "acme-frontend");

    assert_eq!(generated.status.status.as_deref(), Some(STATUS_DEPLOYED));
    assert_eq!(generated.status.release_namespace.as_deref(), Some("acme"));
    assert_eq!(generated.status.release_name.as_deref(), Some("acme-frontend"));
    assert_eq!(generated.status.system_namespace.as_deref(), Some(SYSTEM_NAMESPACE));
}

#[test]
fn test_single_namespace_request_in_system_namespace() {
    let getter = Arc::new(SingleNamespaceProjectGetter::new(SYSTEM_NAMESPACE, &[]));
    getter.on_namespace_change(&namespace(SYSTEM_NAMESPACE, &[]));
    getter.on_namespace_change(&namespace("shop", &[]));
    getter.on_namespace_change(&namespace("acme", &[]));
    let reconciler = ProjectHelmChartReconciler::new(SYSTEM_NAMESPACE, Arc::new(options()), getter);

    let generated = reconciler
        .on_change(
            &project_helm_chart(SYSTEM_NAMESPACE, "frontend"),
            ProjectHelmChartStatus::default(),
        )
        .unwrap();

    let helm_chart = generated.resources.helm_chart.unwrap();
    assert_eq!(
        helm_chart.metadata.name.as_deref(),
        Some("cattle-helm-system-frontend")
    );
    assert_eq!(generated.status.target_namespaces, vec!["acme", "shop"]);
}

#[test]
fn test_single_namespace_invalid_selector_fails_request() {
    let getter = Arc::new(SingleNamespaceProjectGetter::new(SYSTEM_NAMESPACE, &[]));
    getter.on_namespace_change(&namespace("acme", &[]));
    let reconciler = ProjectHelmChartReconciler::new(SYSTEM_NAMESPACE, Arc::new(options()), getter);

    let mut request = project_helm_chart(SYSTEM_NAMESPACE, "frontend");
    request.spec.project_namespace_selector = Some(LabelSelector {
        match_labels: None,
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: "team".to_string(),
            operator: "Bogus".to_string(),
            values: None,
        }]),
    });

    match reconciler.on_change(&request, ProjectHelmChartStatus::default()) {
        Err(e @ Error::ValidationError(_)) => assert!(!e.is_retriable()),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_multi_tenant_scenario() {
    let (reconciler, _) = multi_tenant_reconciler();
    let request = project_helm_chart("cattle-project-p1", "monitoring");

    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();

    assert_eq!(generated.status.target_namespaces, vec!["ns-a", "ns-b"]);

    let helm_chart = generated.resources.helm_chart.unwrap();
    assert_eq!(
        helm_chart.metadata.name.as_deref(),
        Some("cattle-project-p1-monitoring")
    );
    let values = values_of(&helm_chart.spec.values_content);
    assert_eq!(
        values["global"]["cattle"]["projectNamespaces"],
        json!(["ns-a", "ns-b"])
    );
}

#[test]
fn test_resync_maps_derived_resources_to_owner() {
    let (reconciler, getter) = multi_tenant_reconciler();
    let request = project_helm_chart("cattle-project-p1", "monitoring");

    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();
    let helm_chart = generated.resources.helm_chart.unwrap();
    let helm_release = generated.resources.helm_release.unwrap();

    let expected = ObjectRef::<ProjectHelmChart>::new("monitoring").within("cattle-project-p1");
    assert_eq!(resolve_owner(&helm_chart, getter.as_ref()), Some(expected.clone()));
    assert_eq!(resolve_owner(&helm_release, getter.as_ref()), Some(expected));
}

#[test]
fn test_resync_ignores_owners_outside_registration_namespaces() {
    let (reconciler, getter) = multi_tenant_reconciler();
    let generated = reconciler
        .on_change(
            &project_helm_chart("cattle-project-p1", "monitoring"),
            ProjectHelmChartStatus::default(),
        )
        .unwrap();

    let mut helm_chart = generated.resources.helm_chart.unwrap();
    helm_chart
        .metadata
        .annotations
        .as_mut()
        .unwrap()
        .insert(OWNER_NAMESPACE_ANNOTATION.to_string(), "ns-a".to_string());
    assert_eq!(resolve_owner(&helm_chart, getter.as_ref()), None);

    helm_chart.metadata.annotations = None;
    assert_eq!(resolve_owner(&helm_chart, getter.as_ref()), None);
}

// ============================================================================
// Generation Tests
// ============================================================================

#[test]
fn test_generation_is_deterministic() {
    let (reconciler, _) = multi_tenant_reconciler();
    let mut request = project_helm_chart("cattle-project-p1", "monitoring");
    request.spec.values = Some(map(json!({
        "zeta": {"b": 1, "a": 2},
        "alpha": ["x", "y"],
    })));

    let first = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();
    let second = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first.resources).unwrap(),
        serde_json::to_vec(&second.resources).unwrap()
    );
}

#[test]
fn test_derived_resources_are_labeled_and_linked() {
    let reconciler = static_reconciler("acme", &["acme"], options());
    let generated = reconciler
        .on_change(
            &project_helm_chart("acme", "frontend"),
            ProjectHelmChartStatus::default(),
        )
        .unwrap();

    let helm_chart = generated.resources.helm_chart.unwrap();
    let labels = helm_chart.metadata.labels.unwrap();
    assert_eq!(labels[HELM_PROJECT_OPERATED_LABEL], "true");
    assert_eq!(
        labels[HELM_PROJECT_OPERATOR_HELM_API_VERSION_LABEL],
        "dummy.cattle.io.v1alpha1"
    );
    let annotations = helm_chart.metadata.annotations.unwrap();
    assert_eq!(annotations[OWNER_NAMESPACE_ANNOTATION], "acme");
    assert_eq!(annotations[OWNER_NAME_ANNOTATION], "frontend");
    assert_eq!(helm_chart.spec.chart_content, "Y2hhcnQtY29udGVudA==");
}

#[test]
fn test_default_job_image() {
    let reconciler = static_reconciler("acme", &["acme"], options());
    let generated = reconciler
        .on_change(
            &project_helm_chart("acme", "frontend"),
            ProjectHelmChartStatus::default(),
        )
        .unwrap();

    assert_eq!(generated.resources.helm_chart.unwrap().spec.job_image, DEFAULT_JOB_IMAGE);
}

#[test]
fn test_job_image_override() {
    let opts = Options {
        helm_job_image: Some("registry.example.com/klipper-helm:custom".to_string()),
        ..options()
    };
    let reconciler = static_reconciler("acme", &["acme"], opts);
    let generated = reconciler
        .on_change(
            &project_helm_chart("acme", "frontend"),
            ProjectHelmChartStatus::default(),
        )
        .unwrap();

    assert_eq!(
        generated.resources.helm_chart.unwrap().spec.job_image,
        "registry.example.com/klipper-helm:custom"
    );
}

#[test]
fn test_values_are_merged_without_mutating_the_request() {
    let opts = Options {
        system_default_registry: Some("registry.example.com".to_string()),
        cattle_url: Some("https://rancher.example.com".to_string()),
        ..options()
    };
    let reconciler = static_reconciler("acme", &["acme"], opts);
    let mut request = project_helm_chart("acme", "frontend");
    request.spec.values = Some(map(json!({
        "replicas": 2,
        "global": {"cattle": {"foo": "bar"}},
    })));
    let original = request.spec.values.clone();

    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();

    assert_eq!(request.spec.values, original);

    let values = values_of(&generated.resources.helm_chart.unwrap().spec.values_content);
    assert_eq!(values["replicas"], json!(2));
    assert_eq!(values["global"]["cattle"]["foo"], json!("bar"));
    assert_eq!(values["global"]["cattle"]["projectNamespaces"], json!(["acme"]));
    assert_eq!(
        values["global"]["cattle"]["systemDefaultRegistry"],
        json!("registry.example.com")
    );
    assert_eq!(
        values["global"]["cattle"]["url"],
        json!("https://rancher.example.com")
    );
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_chart_name_at_budget_is_accepted() {
    let namespace = "cattle-project-p1";
    let name = "a".repeat(MAX_NUMBER_OF_CHARACTERS - namespace.len() - 1);
    let request = project_helm_chart(namespace, &name);

    let chart_name = chart_name(&request).unwrap();
    assert_eq!(chart_name.len(), MAX_NUMBER_OF_CHARACTERS);
}

#[test]
fn test_chart_name_over_budget_produces_nothing() {
    let (reconciler, _) = multi_tenant_reconciler();
    let namespace = "cattle-project-p1";
    let name = "a".repeat(MAX_NUMBER_OF_CHARACTERS - namespace.len());
    let request = project_helm_chart(namespace, &name);

    let result = reconciler.on_change(&request, ProjectHelmChartStatus::default());

    match result {
        Err(e @ Error::ValidationError(_)) => assert!(!e.is_retriable()),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_failed_status_records_error() {
    let request = project_helm_chart("acme", "frontend");
    let previous = ProjectHelmChartStatus {
        status: Some(STATUS_DEPLOYED.to_string()),
        release_name: Some("acme-frontend".to_string()),
        ..Default::default()
    };
    let err = Error::ValidationError("name too long".to_string());

    let status = failed_status(&request, previous, &err);

    assert_eq!(status.status.as_deref(), Some(STATUS_FAILED));
    assert!(status.status_message.unwrap().contains("name too long"));
    assert_eq!(status.release_name, None);
    assert_eq!(status.observed_generation, Some(1));
}

// ============================================================================
// Gating Tests
// ============================================================================

#[test]
fn test_request_outside_registration_namespace_is_ignored() {
    let (reconciler, _) = multi_tenant_reconciler();
    let request = project_helm_chart("ns-a", "monitoring");
    let status = ProjectHelmChartStatus {
        status_message: Some("untouched".to_string()),
        ..Default::default()
    };

    assert!(!reconciler.is_handled(&request).unwrap());
    let generated = reconciler.on_change(&request, status.clone()).unwrap();
    assert!(generated.resources.is_empty());
    assert_eq!(generated.status, status);
}

#[test]
fn test_request_for_other_api_version_is_ignored() {
    let (reconciler, _) = multi_tenant_reconciler();
    let mut request = project_helm_chart("cattle-project-p1", "monitoring");
    request.spec.helm_api_version = "other.cattle.io/v1alpha1".to_string();

    assert!(!reconciler.is_handled(&request).unwrap());
    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();
    assert!(generated.resources.is_empty());
}

#[test]
fn test_cleanup_label_removes_derived_resources() {
    let (reconciler, _) = multi_tenant_reconciler();
    let mut request = project_helm_chart("cattle-project-p1", "monitoring");
    request.metadata.labels = Some(BTreeMap::from([(
        HELM_PROJECT_OPERATED_CLEANUP_LABEL.to_string(),
        "true".to_string(),
    )]));

    let generated = reconciler
        .on_change(&request, ProjectHelmChartStatus::default())
        .unwrap();

    assert!(generated.resources.is_empty());
    assert_eq!(generated.status.status.as_deref(), Some(STATUS_CLEANED_UP));
}

// ============================================================================
// Singleton Tests
// ============================================================================

fn created_at(mut request: ProjectHelmChart, hour: u32) -> ProjectHelmChart {
    request.metadata.creation_timestamp =
        Some(Time(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()));
    request
}

#[test]
fn test_singleton_allows_only_the_oldest_request() {
    let opts = Options {
        singleton: true,
        ..options()
    };
    let reconciler = static_reconciler("acme", &["acme"], opts);
    let oldest = created_at(project_helm_chart("acme", "first"), 1);
    let newer = created_at(project_helm_chart("acme", "second"), 2);
    let siblings = vec![oldest.clone(), newer.clone()];

    assert!(reconciler.check_singleton(&oldest, &siblings).is_ok());
    match reconciler.check_singleton(&newer, &siblings) {
        Err(Error::ValidationError(msg)) => assert!(msg.contains("first")),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_singleton_disabled_allows_every_request() {
    let reconciler = static_reconciler("acme", &["acme"], options());
    let oldest = created_at(project_helm_chart("acme", "first"), 1);
    let newer = created_at(project_helm_chart("acme", "second"), 2);

    assert!(reconciler
        .check_singleton(&newer, &[oldest, newer.clone()])
        .is_ok());
}

// ============================================================================
// Status Tests
// ============================================================================

fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

#[test]
fn test_dashboard_values_are_merged_from_config_maps() {
    let values = dashboard_values(&[
        config_map("b-dashboards", &[("grafana", r#"{"url": "http://grafana"}"#)]),
        config_map("a-dashboards", &[("title", "Project Monitoring")]),
    ])
    .unwrap();

    assert_eq!(values["grafana"], json!({"url": "http://grafana"}));
    assert_eq!(values["title"], json!("Project Monitoring"));
    assert_eq!(dashboard_values(&[]), None);
}

#[test]
fn test_dashboard_values_are_kept_across_passes() {
    let reconciler = static_reconciler("acme", &["acme"], options());
    let previous = ProjectHelmChartStatus {
        dashboard_values: Some(map(json!({"title": "kept"}))),
        ..Default::default()
    };

    let generated = reconciler
        .on_change(&project_helm_chart("acme", "frontend"), previous)
        .unwrap();

    assert_eq!(
        generated.status.dashboard_values,
        Some(map(json!({"title": "kept"})))
    );
}

#[test]
fn test_status_patch_clears_unset_fields() {
    let status = ProjectHelmChartStatus {
        status: Some(STATUS_FAILED.to_string()),
        status_message: Some("boom".to_string()),
        ..Default::default()
    };

    let patch = status_patch(&status);

    assert_eq!(patch["status"]["status"], json!(STATUS_FAILED));
    assert_eq!(patch["status"]["statusMessage"], json!("boom"));
    assert!(patch["status"]["releaseName"].is_null());
    assert!(patch["status"]["dashboardValues"].is_null());
    assert_eq!(patch["status"]["targetNamespaces"], json!([]));
}
