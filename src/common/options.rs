//! Startup configuration for the operator

use std::path::PathBuf;

use tracing::{info, warn};

use crate::common::labels::HELM_PROJECT_OPERATED_ORPHANED_LABEL;
use crate::{Error, Result};

/// Default namespace that hosts HelmCharts and HelmReleases
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "cattle-helm-system";

/// Default Helm API version served by this operator
pub const DEFAULT_HELM_API_VERSION: &str = "dummy.cattle.io/v1alpha1";

/// Default name of the Helm release deployed for each project
pub const DEFAULT_RELEASE_NAME: &str = "dummy";

/// Default port for the metrics server
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Flags and environment variables accepted by the operator binary
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "helm-project-operator", version, about)]
pub struct RuntimeOptions {
    /// Namespace to create HelmCharts and HelmReleases in; without a project label
    /// this is also the only namespace watched for ProjectHelmCharts
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Label on namespaces used to create project registration namespaces
    #[arg(long, env = "PROJECT_LABEL")]
    pub project_label: Option<String>,

    /// Value of the project label that marks a namespace as a system namespace
    #[arg(long, env = "SYSTEM_PROJECT_LABEL_VALUE")]
    pub system_project_label_value: Option<String>,

    /// Identifies the cluster this operator runs in; ignored without a project label
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Job image used to run helm operations for generated HelmCharts
    #[arg(long, env = "HELM_JOB_IMAGE")]
    pub helm_job_image: Option<String>,

    /// Provided to the chart as global.cattle.systemDefaultRegistry
    #[arg(long, env = "SYSTEM_DEFAULT_REGISTRY")]
    pub system_default_registry: Option<String>,

    /// Provided to the chart as global.cattle.url
    #[arg(long, env = "CATTLE_URL")]
    pub cattle_url: Option<String>,

    /// spec.helmApiVersion of the ProjectHelmCharts handled by this operator
    #[arg(long, env = "HELM_API_VERSION", default_value = DEFAULT_HELM_API_VERSION)]
    pub helm_api_version: String,

    /// Name of the Helm release deployed for each ProjectHelmChart
    #[arg(long, env = "RELEASE_NAME", default_value = DEFAULT_RELEASE_NAME)]
    pub release_name: String,

    /// Additional namespaces that may never be targeted by a project
    #[arg(long, env = "SYSTEM_NAMESPACES", value_delimiter = ',')]
    pub system_namespaces: Vec<String>,

    /// Path to the base64-encoded chart archive embedded into every HelmChart
    #[arg(long, env = "CHART_CONTENT_PATH")]
    pub chart_content_path: Option<PathBuf>,

    /// Path to the default values.yaml published to registration namespaces
    #[arg(long, env = "VALUES_PATH")]
    pub values_path: Option<PathBuf>,

    /// Path to the questions.yaml published to registration namespaces
    #[arg(long, env = "QUESTIONS_PATH")]
    pub questions_path: Option<PathBuf>,

    /// Only allow a single ProjectHelmChart per registration namespace
    #[arg(long, env = "SINGLETON")]
    pub singleton: bool,

    /// Port for the metrics and health server
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Identity used when holding leader locks
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,
}

impl RuntimeOptions {
    /// Read referenced files and build the operator options
    pub fn into_options(self) -> Result<Options> {
        let chart_content = read_optional(self.chart_content_path.as_ref())?;
        let values_yaml = read_optional(self.values_path.as_ref())?;
        let questions_yaml = read_optional(self.questions_path.as_ref())?;

        Ok(Options {
            helm_api_version: self.helm_api_version,
            release_name: self.release_name,
            system_namespaces: self.system_namespaces,
            chart_content: chart_content.trim().to_string(),
            values_yaml,
            questions_yaml,
            singleton: self.singleton,
            project_label: non_empty(self.project_label),
            system_project_label_value: non_empty(self.system_project_label_value),
            system_default_registry: non_empty(self.system_default_registry),
            cattle_url: non_empty(self.cattle_url),
            cluster_id: non_empty(self.cluster_id),
            helm_job_image: non_empty(self.helm_job_image),
        })
    }

    /// Identity for leader locks, falling back to the host name
    pub fn lock_identity(&self) -> String {
        self.identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "helm-project-operator".to_string())
    }
}

fn read_optional(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        }),
        None => Ok(String::new()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Options shared by every controller once the operator has started
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub helm_api_version: String,
    pub release_name: String,
    pub system_namespaces: Vec<String>,
    pub chart_content: String,
    pub values_yaml: String,
    pub questions_yaml: String,
    pub singleton: bool,

    pub project_label: Option<String>,
    pub system_project_label_value: Option<String>,
    pub system_default_registry: Option<String>,
    pub cattle_url: Option<String>,
    pub cluster_id: Option<String>,
    pub helm_job_image: Option<String>,
}

impl Options {
    /// Add the operator's own namespace to the system namespaces
    pub fn with_system_namespace(mut self, system_namespace: &str) -> Self {
        if !self.system_namespaces.iter().any(|ns| ns == system_namespace) {
            self.system_namespaces.push(system_namespace.to_string());
        }
        self
    }

    /// Fail on missing mandatory fields and log the effective policy
    pub fn validate(&self) -> Result<()> {
        if self.helm_api_version.is_empty() {
            return Err(Error::ConfigError(
                "must provide a spec.helmApiVersion that this project operator is being initialized for"
                    .to_string(),
            ));
        }

        if self.release_name.is_empty() {
            return Err(Error::ConfigError(
                "must provide name of Helm release that this project operator should deploy"
                    .to_string(),
            ));
        }

        if !self.system_namespaces.is_empty() {
            info!(
                "Marking the following namespaces as system namespaces: {:?}",
                self.system_namespaces
            );
        }

        if self.chart_content.is_empty() {
            return Err(Error::ConfigError(
                "cannot instantiate Project Operator without bundling a Helm chart to provide for the HelmChart's spec.chartContent"
                    .to_string(),
            ));
        }

        if self.singleton {
            info!("Note: Operator only supports a single ProjectHelmChart per project registration namespace");
            if self.project_label.is_none() {
                warn!("It is only recommended to run a singleton Project Operator when --project-label is provided (currently not set). The current configuration of this operator would only allow a single ProjectHelmChart to be managed by this Operator.");
            }
        }

        if let Some(project_label) = &self.project_label {
            info!(
                "Creating dedicated project registration namespaces to discover ProjectHelmCharts based on the value found for the project label {} on all namespaces in the cluster, excluding system namespaces; these namespaces will need to be manually cleaned up if they have the label '{}: \"true\"'",
                project_label, HELM_PROJECT_OPERATED_ORPHANED_LABEL
            );
            if let Some(value) = &self.system_project_label_value {
                info!(
                    "assuming namespaces tagged with {}={} are also system namespaces",
                    project_label, value
                );
            }
            if let Some(cluster_id) = &self.cluster_id {
                info!(
                    "Marking project registration namespaces with {}={}:<projectID>",
                    project_label, cluster_id
                );
            }
        }

        if let Some(image) = &self.helm_job_image {
            info!(
                "Using {} as spec.jobImage on all generated HelmChart resources",
                image
            );
        }

        Ok(())
    }
}
