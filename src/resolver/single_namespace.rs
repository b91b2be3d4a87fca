//! Project resolution when only the system namespace registers ProjectHelmCharts

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Namespace;
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;

use super::{NamespaceUpdate, ProjectGetter, RegistrationCounts};
use crate::crd::ProjectHelmChart;
use crate::{Error, Result};

/// The system namespace is the one and only registration namespace.
///
/// A ProjectHelmChart without a `projectNamespaceSelector` targets every
/// non-system namespace. With a selector it targets the non-system namespaces
/// matching it; an empty selector matches all of them.
pub struct SingleNamespaceProjectGetter {
    system_namespace: String,
    system_namespaces: HashSet<String>,
    /// Namespace name -> labels
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
}

impl SingleNamespaceProjectGetter {
    pub fn new(system_namespace: &str, system_namespaces: &[String]) -> Self {
        let mut system: HashSet<String> = system_namespaces.iter().cloned().collect();
        system.insert(system_namespace.to_string());
        Self {
            system_namespace: system_namespace.to_string(),
            system_namespaces: system,
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    fn resync_system_namespace(&self) -> NamespaceUpdate {
        NamespaceUpdate {
            resync_namespaces: BTreeSet::from([self.system_namespace.clone()]),
            ..Default::default()
        }
    }
}

impl ProjectGetter for SingleNamespaceProjectGetter {
    fn is_project_registration_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(namespace == self.system_namespace)
    }

    fn get_target_project_namespaces(
        &self,
        project_helm_chart: &ProjectHelmChart,
    ) -> Result<Vec<String>> {
        let selector = match &project_helm_chart.spec.project_namespace_selector {
            Some(selector) => Some(Selector::try_from(selector.clone()).map_err(|e| {
                Error::ValidationError(format!(
                    "invalid projectNamespaceSelector on ProjectHelmChart {}/{}: {}",
                    project_helm_chart.namespace().unwrap_or_default(),
                    project_helm_chart.name_any(),
                    e
                ))
            })?),
            None => None,
        };

        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| Error::ResolutionError("namespace cache lock poisoned".to_string()))?;
        Ok(namespaces
            .iter()
            .filter(|(name, _)| !self.system_namespaces.contains(*name))
            .filter(|(_, labels)| selector.as_ref().map_or(true, |s| s.matches(labels)))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn on_namespace_change(&self, namespace: &Namespace) -> NamespaceUpdate {
        let name = namespace.name_any();
        let labels = namespace.labels().clone();
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());

        if namespace.metadata.deletion_timestamp.is_some() {
            namespaces.remove(&name);
            return self.resync_system_namespace();
        }
        if namespaces.get(&name) == Some(&labels) {
            return NamespaceUpdate::default();
        }
        namespaces.insert(name, labels);
        self.resync_system_namespace()
    }

    fn on_namespace_remove(&self, namespace: &Namespace) -> NamespaceUpdate {
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        match namespaces.remove(&namespace.name_any()) {
            Some(_) => self.resync_system_namespace(),
            None => NamespaceUpdate::default(),
        }
    }

    fn on_initial_sync(&self) -> NamespaceUpdate {
        NamespaceUpdate {
            config_map_namespaces: vec![self.system_namespace.clone()],
            ..self.resync_system_namespace()
        }
    }

    fn registration_counts(&self) -> RegistrationCounts {
        RegistrationCounts {
            active: 1,
            orphaned: 0,
        }
    }
}
