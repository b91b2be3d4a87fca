//! HelmChart builder for the helm-controller

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::common::labels::{derived_labels, owner_annotations};
use crate::common::Options;
use crate::crd::{HelmChart, HelmChartSpec, ProjectHelmChart};

/// Job image used when no override is configured
pub const DEFAULT_JOB_IMAGE: &str = "rancher/klipper-helm:v0.7.0-build20220315";

/// Build the HelmChart that installs a ProjectHelmChart's release.
///
/// The HelmChart lives in the system namespace since the helm-controller only
/// watches that namespace.
pub fn build_helm_chart(
    project_helm_chart: &ProjectHelmChart,
    system_namespace: &str,
    chart_name: &str,
    values_content: String,
    opts: &Options,
) -> HelmChart {
    let namespace = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();

    let job_image = opts
        .helm_job_image
        .clone()
        .unwrap_or_else(|| DEFAULT_JOB_IMAGE.to_string());

    HelmChart {
        metadata: ObjectMeta {
            name: Some(chart_name.to_string()),
            namespace: Some(system_namespace.to_string()),
            labels: Some(derived_labels(&opts.helm_api_version)),
            annotations: Some(owner_annotations(&namespace, &name)),
            ..Default::default()
        },
        spec: HelmChartSpec {
            chart: name,
            target_namespace: namespace,
            job_image,
            chart_content: opts.chart_content.clone(),
            values_content,
        },
    }
}
