//! Project and namespace resolution
//!
//! Decides which namespaces host ProjectHelmCharts (project registration
//! namespaces) and which namespaces a project targets. Two strategies exist and
//! one is picked at startup:
//!
//! - [`LabelProjectGetter`] when a project label is configured: projects are
//!   discovered from the label's value on every namespace and each project gets
//!   an auto-generated registration namespace.
//! - [`SingleNamespaceProjectGetter`] otherwise: the system namespace is the
//!   only registration namespace.
//!
//! Both keep an in-memory view of namespaces that is fed by namespace watch
//! events and read synchronously during reconciliation.

mod label_project_getter;
mod single_namespace;

pub use label_project_getter::LabelProjectGetter;
pub use single_namespace::SingleNamespaceProjectGetter;

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;

use crate::common::Options;
use crate::crd::ProjectHelmChart;
use crate::Result;

/// A project registration namespace that should exist in the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationNamespace {
    /// Project the namespace registers ProjectHelmCharts for
    pub project_id: String,
    /// Whether the project no longer has any target namespaces
    pub orphaned: bool,
}

/// Work produced by a namespace event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceUpdate {
    /// Registration namespaces to create or relabel
    pub registration_namespaces: Vec<RegistrationNamespace>,
    /// Namespaces that should receive the values/questions ConfigMap
    pub config_map_namespaces: Vec<String>,
    /// Registration namespaces whose ProjectHelmCharts need to be reconciled again
    pub resync_namespaces: BTreeSet<String>,
}

impl NamespaceUpdate {
    pub fn is_empty(&self) -> bool {
        self.registration_namespaces.is_empty()
            && self.config_map_namespaces.is_empty()
            && self.resync_namespaces.is_empty()
    }

    /// Fold a newer update into this one. The newer state of a registration
    /// namespace replaces the older one.
    pub fn merge(mut self, newer: NamespaceUpdate) -> NamespaceUpdate {
        for registration in newer.registration_namespaces {
            self.registration_namespaces
                .retain(|r| r.project_id != registration.project_id);
            self.registration_namespaces.push(registration);
        }
        for namespace in newer.config_map_namespaces {
            if !self.config_map_namespaces.contains(&namespace) {
                self.config_map_namespaces.push(namespace);
            }
        }
        self.resync_namespaces.extend(newer.resync_namespaces);
        self
    }
}

/// Number of tracked registration namespaces by state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistrationCounts {
    pub active: usize,
    pub orphaned: usize,
}

/// Resolves project membership for ProjectHelmCharts
pub trait ProjectGetter: Send + Sync {
    /// Whether ProjectHelmCharts in this namespace should be processed.
    /// Unknown namespaces are not registration namespaces.
    fn is_project_registration_namespace(&self, namespace: &str) -> Result<bool>;

    /// Namespaces targeted by the project a ProjectHelmChart was registered for
    fn get_target_project_namespaces(&self, project_helm_chart: &ProjectHelmChart)
        -> Result<Vec<String>>;

    /// Record a namespace that was added or updated
    fn on_namespace_change(&self, namespace: &Namespace) -> NamespaceUpdate;

    /// Record a namespace that was removed
    fn on_namespace_remove(&self, namespace: &Namespace) -> NamespaceUpdate;

    /// Called once the initial namespace listing has been delivered
    fn on_initial_sync(&self) -> NamespaceUpdate;

    /// Registration namespaces currently tracked
    fn registration_counts(&self) -> RegistrationCounts {
        RegistrationCounts::default()
    }
}

/// Pick the resolution strategy for the configured options
pub fn new_project_getter(system_namespace: &str, opts: &Options) -> Arc<dyn ProjectGetter> {
    match &opts.project_label {
        Some(project_label) => Arc::new(LabelProjectGetter::new(
            project_label,
            opts.system_project_label_value.as_deref(),
            &opts.system_namespaces,
        )),
        None => Arc::new(SingleNamespaceProjectGetter::new(
            system_namespace,
            &opts.system_namespaces,
        )),
    }
}
