//! HelmRelease builder for helm-locker

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::common::labels::{derived_labels, owner_annotations};
use crate::common::Options;
use crate::crd::{HelmRelease, HelmReleaseSpec, ProjectHelmChart, ReleaseKey};

/// Build the HelmRelease that locks a ProjectHelmChart's release.
///
/// Like the HelmChart it lives in the system namespace, which is the only
/// namespace helm-locker watches.
pub fn build_helm_release(
    project_helm_chart: &ProjectHelmChart,
    system_namespace: &str,
    chart_name: &str,
    opts: &Options,
) -> HelmRelease {
    let namespace = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();

    HelmRelease {
        metadata: ObjectMeta {
            name: Some(chart_name.to_string()),
            namespace: Some(system_namespace.to_string()),
            labels: Some(derived_labels(&opts.helm_api_version)),
            annotations: Some(owner_annotations(&namespace, &name)),
            ..Default::default()
        },
        spec: HelmReleaseSpec {
            release: ReleaseKey {
                name: chart_name.to_string(),
                namespace,
            },
        },
    }
}
