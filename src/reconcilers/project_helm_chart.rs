//! Generation of derived resources for ProjectHelmCharts
//!
//! Everything in here is a pure function of the ProjectHelmChart, the resolved
//! project namespaces and the operator options. Applying the result to the
//! cluster happens in [`crate::reconcilers::apply`].

use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::adapters::{helm_chart_builder, helm_release_builder, values};
use crate::common::labels::{is_label_true, HELM_PROJECT_OPERATED_CLEANUP_LABEL};
use crate::common::Options;
use crate::crd::{
    GenericMap, HelmChart, HelmRelease, ProjectHelmChart, ProjectHelmChartStatus,
    STATUS_CLEANED_UP, STATUS_DEPLOYED, STATUS_FAILED,
};
use crate::resolver::ProjectGetter;
use crate::{Error, Result};

/// Kubernetes names are at most 63 characters and derived resources add up to 14
/// characters of their own (e.g. `chart-values-`), so `{namespace}-{name}` must
/// stay within this budget.
pub const MAX_NUMBER_OF_CHARACTERS: usize = 63 - 14;

/// Derived resources for one ProjectHelmChart
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DesiredResources {
    pub helm_chart: Option<HelmChart>,
    pub helm_release: Option<HelmRelease>,
}

impl DesiredResources {
    pub fn is_empty(&self) -> bool {
        self.helm_chart.is_none() && self.helm_release.is_none()
    }
}

/// Output of a reconcile pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generated {
    pub resources: DesiredResources,
    pub status: ProjectHelmChartStatus,
}

impl Generated {
    fn unchanged(status: ProjectHelmChartStatus) -> Self {
        Self {
            resources: DesiredResources::default(),
            status,
        }
    }
}

/// Turns ProjectHelmCharts into HelmCharts and HelmReleases
pub struct ProjectHelmChartReconciler {
    system_namespace: String,
    opts: Arc<Options>,
    project_getter: Arc<dyn ProjectGetter>,
}

impl ProjectHelmChartReconciler {
    pub fn new(
        system_namespace: &str,
        opts: Arc<Options>,
        project_getter: Arc<dyn ProjectGetter>,
    ) -> Self {
        Self {
            system_namespace: system_namespace.to_string(),
            opts,
            project_getter,
        }
    }

    /// Whether this operator is responsible for the ProjectHelmChart at all
    pub fn is_handled(&self, project_helm_chart: &ProjectHelmChart) -> Result<bool> {
        if project_helm_chart.spec.helm_api_version != self.opts.helm_api_version {
            return Ok(false);
        }
        let namespace = project_helm_chart.namespace().unwrap_or_default();
        self.project_getter
            .is_project_registration_namespace(&namespace)
    }

    /// Compute the desired derived resources and the new status.
    ///
    /// ProjectHelmCharts outside of registration namespaces, or for another Helm
    /// API version, produce nothing and keep their status.
    pub fn on_change(
        &self,
        project_helm_chart: &ProjectHelmChart,
        status: ProjectHelmChartStatus,
    ) -> Result<Generated> {
        if !self.is_handled(project_helm_chart)? {
            debug!(
                namespace = project_helm_chart.namespace().unwrap_or_default(),
                name = %project_helm_chart.name_any(),
                "Ignoring ProjectHelmChart outside of a project registration namespace"
            );
            return Ok(Generated::unchanged(status));
        }

        if is_label_true(project_helm_chart.labels(), HELM_PROJECT_OPERATED_CLEANUP_LABEL) {
            return Ok(Generated {
                resources: DesiredResources::default(),
                status: ProjectHelmChartStatus {
                    status: Some(STATUS_CLEANED_UP.to_string()),
                    status_message: Some(format!(
                        "ProjectHelmChart is marked with {}; derived resources have been removed",
                        HELM_PROJECT_OPERATED_CLEANUP_LABEL
                    )),
                    observed_generation: project_helm_chart.metadata.generation,
                    ..Default::default()
                },
            });
        }

        let chart_name = chart_name(project_helm_chart)?;

        let target_namespaces = self
            .project_getter
            .get_target_project_namespaces(project_helm_chart)
            .map_err(|e| match e {
                Error::ValidationError(_) => e,
                e => Error::ResolutionError(format!(
                    "unable to get target project namespaces for ProjectHelmChart {}/{}: {}",
                    project_helm_chart.namespace().unwrap_or_default(),
                    project_helm_chart.name_any(),
                    e
                )),
            })?;

        let merged = values::merge_values(
            project_helm_chart.spec.values.as_ref(),
            &target_namespaces,
            &self.opts,
        );
        let values_content = values::to_values_content(&merged).map_err(|e| {
            Error::SerializationError(format!(
                "unable to marshal spec.values of {}/{}: {}",
                project_helm_chart.namespace().unwrap_or_default(),
                project_helm_chart.name_any(),
                e
            ))
        })?;

        let helm_chart = helm_chart_builder::build_helm_chart(
            project_helm_chart,
            &self.system_namespace,
            &chart_name,
            values_content,
            &self.opts,
        );
        let helm_release = helm_release_builder::build_helm_release(
            project_helm_chart,
            &self.system_namespace,
            &chart_name,
            &self.opts,
        );

        let release_namespace = project_helm_chart.namespace().unwrap_or_default();
        let status = ProjectHelmChartStatus {
            status: Some(STATUS_DEPLOYED.to_string()),
            status_message: Some(format!(
                "Deployed HelmChart and HelmRelease {}/{}",
                self.system_namespace, chart_name
            )),
            system_namespace: Some(self.system_namespace.clone()),
            release_namespace: Some(release_namespace),
            release_name: Some(chart_name),
            target_namespaces,
            dashboard_values: status.dashboard_values,
            observed_generation: project_helm_chart.metadata.generation,
        };

        Ok(Generated {
            resources: DesiredResources {
                helm_chart: Some(helm_chart),
                helm_release: Some(helm_release),
            },
            status,
        })
    }

    /// In singleton mode only the oldest ProjectHelmChart of a registration
    /// namespace is deployed.
    pub fn check_singleton(
        &self,
        project_helm_chart: &ProjectHelmChart,
        siblings: &[ProjectHelmChart],
    ) -> Result<()> {
        if !self.opts.singleton {
            return Ok(());
        }
        let namespace = project_helm_chart.namespace();
        let oldest = siblings
            .iter()
            .chain(std::iter::once(project_helm_chart))
            .filter(|other| other.namespace() == namespace)
            .filter(|other| other.spec.helm_api_version == self.opts.helm_api_version)
            .filter(|other| other.metadata.deletion_timestamp.is_none())
            .min_by(|a, b| {
                a.creation_timestamp()
                    .map(|t| t.0)
                    .cmp(&b.creation_timestamp().map(|t| t.0))
                    .then_with(|| a.name_any().cmp(&b.name_any()))
            });

        match oldest {
            Some(oldest) if oldest.name_any() != project_helm_chart.name_any() => {
                Err(Error::ValidationError(format!(
                    "only one ProjectHelmChart for {} is allowed per project registration namespace; {}/{} is already registered",
                    self.opts.helm_api_version,
                    namespace.unwrap_or_default(),
                    oldest.name_any()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Name of the derived HelmChart and HelmRelease: `{namespace}-{name}`
pub fn chart_name(project_helm_chart: &ProjectHelmChart) -> Result<String> {
    let namespace = project_helm_chart.namespace().unwrap_or_default();
    let name = project_helm_chart.name_any();
    let chart_name = format!("{}-{}", namespace, name);
    if chart_name.len() > MAX_NUMBER_OF_CHARACTERS {
        return Err(Error::ValidationError(format!(
            "ProjectHelmChart {}/{} will create child resources that exceed the max length of characters for Kubernetes objects: chart name {} must be at most {} characters long",
            namespace, name, chart_name, MAX_NUMBER_OF_CHARACTERS
        )));
    }
    Ok(chart_name)
}

/// Status recorded when a pass fails permanently
pub fn failed_status(
    project_helm_chart: &ProjectHelmChart,
    status: ProjectHelmChartStatus,
    err: &Error,
) -> ProjectHelmChartStatus {
    ProjectHelmChartStatus {
        status: Some(STATUS_FAILED.to_string()),
        status_message: Some(err.to_string()),
        observed_generation: project_helm_chart.metadata.generation,
        dashboard_values: status.dashboard_values,
        ..Default::default()
    }
}

/// Merge patch replacing the whole status.
///
/// Every field is written explicitly so fields that are no longer set are
/// removed rather than left behind by the merge.
pub fn status_patch(status: &ProjectHelmChartStatus) -> serde_json::Value {
    json!({
        "status": {
            "status": status.status,
            "statusMessage": status.status_message,
            "systemNamespace": status.system_namespace,
            "releaseNamespace": status.release_namespace,
            "releaseName": status.release_name,
            "targetNamespaces": status.target_namespaces,
            "dashboardValues": status.dashboard_values,
            "observedGeneration": status.observed_generation,
        }
    })
}

/// Merge the data of dashboard ConfigMaps into a single values tree.
///
/// Each data entry is parsed as JSON and kept as a plain string otherwise.
/// ConfigMaps are merged in name order so the result is stable.
pub fn dashboard_values(config_maps: &[ConfigMap]) -> Option<GenericMap> {
    let mut sorted: Vec<&ConfigMap> = config_maps.iter().collect();
    sorted.sort_by_key(|cm| cm.name_any());

    let mut merged = GenericMap::new();
    for config_map in sorted {
        let mut entries = GenericMap::new();
        for (key, raw) in config_map.data.iter().flatten() {
            let value = serde_json::from_str(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            entries.insert(key.clone(), value);
        }
        merged = values::merge_maps(&merged, &entries);
    }

    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}
