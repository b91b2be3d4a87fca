//! Project discovery driven by a label on namespaces

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{NamespaceUpdate, ProjectGetter, RegistrationCounts, RegistrationNamespace};
use crate::common::labels::{
    is_label_true, project_registration_namespace_name, HELM_PROJECT_OPERATED_LABEL,
    HELM_PROJECT_OPERATED_ORPHANED_LABEL,
};
use crate::crd::ProjectHelmChart;
use crate::{Error, Result};

/// Tracks projects by the value of a namespace label.
///
/// Every project with at least one non-system namespace gets a registration
/// namespace. When the last namespace of a project goes away its registration
/// namespace is marked orphaned; it is never deleted here.
pub struct LabelProjectGetter {
    project_label: String,
    system_project_label_value: Option<String>,
    system_namespaces: HashSet<String>,
    index: RwLock<ProjectIndex>,
}

#[derive(Debug, Default)]
struct ProjectIndex {
    /// Set once the initial namespace listing has been processed
    synced: bool,
    /// Target namespace -> project
    namespace_projects: HashMap<String, String>,
    /// Project -> target namespaces
    project_namespaces: BTreeMap<String, BTreeSet<String>>,
    /// Registration namespace -> project
    registration_namespaces: BTreeMap<String, String>,
    /// Registration namespaces last written or observed as orphaned
    orphaned: BTreeSet<String>,
}

impl ProjectIndex {
    fn has_targets(&self, project_id: &str) -> bool {
        self.project_namespaces
            .get(project_id)
            .map(|namespaces| !namespaces.is_empty())
            .unwrap_or(false)
    }

    fn track(&mut self, namespace: &str, project_id: &str) {
        self.namespace_projects
            .insert(namespace.to_string(), project_id.to_string());
        self.project_namespaces
            .entry(project_id.to_string())
            .or_default()
            .insert(namespace.to_string());
    }

    fn untrack(&mut self, namespace: &str) -> Option<String> {
        let project_id = self.namespace_projects.remove(namespace)?;
        if let Some(namespaces) = self.project_namespaces.get_mut(&project_id) {
            namespaces.remove(namespace);
            if namespaces.is_empty() {
                self.project_namespaces.remove(&project_id);
            }
        }
        Some(project_id)
    }

    /// Desired state of a project's registration namespace, recording it in the index.
    /// A project without targets and without a registration namespace needs nothing.
    fn registration_for(&mut self, project_id: &str, update: &mut NamespaceUpdate) {
        let name = project_registration_namespace_name(project_id);
        let orphaned = !self.has_targets(project_id);
        if orphaned && !self.registration_namespaces.contains_key(&name) {
            return;
        }

        self.registration_namespaces
            .insert(name.clone(), project_id.to_string());
        if orphaned {
            self.orphaned.insert(name.clone());
        } else {
            self.orphaned.remove(&name);
            update.config_map_namespaces.push(name.clone());
        }
        update.registration_namespaces.push(RegistrationNamespace {
            project_id: project_id.to_string(),
            orphaned,
        });
        update.resync_namespaces.insert(name);
    }
}

impl LabelProjectGetter {
    pub fn new(
        project_label: &str,
        system_project_label_value: Option<&str>,
        system_namespaces: &[String],
    ) -> Self {
        Self {
            project_label: project_label.to_string(),
            system_project_label_value: system_project_label_value
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            system_namespaces: system_namespaces.iter().cloned().collect(),
            index: RwLock::new(ProjectIndex::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ProjectIndex>> {
        self.index
            .read()
            .map_err(|_| Error::ResolutionError("project index lock poisoned".to_string()))
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProjectIndex> {
        // Writers always leave the index consistent, so a poisoned lock is still usable
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Project this namespace is a registration namespace for, if any
    fn registered_project(&self, namespace: &Namespace) -> Option<String> {
        let labels = namespace.labels();
        if !is_label_true(labels, HELM_PROJECT_OPERATED_LABEL) {
            return None;
        }
        let project_id = labels.get(&self.project_label)?;
        (namespace.name_any() == project_registration_namespace_name(project_id))
            .then(|| project_id.clone())
    }

    /// Project this namespace is a target of. System namespaces never belong to a
    /// project, even when they carry the project label.
    fn target_project(&self, namespace: &Namespace) -> Option<String> {
        if namespace.metadata.deletion_timestamp.is_some() {
            return None;
        }
        let name = namespace.name_any();
        if self.system_namespaces.contains(&name) {
            return None;
        }
        let project_id = namespace.labels().get(&self.project_label)?;
        if project_id.is_empty() {
            return None;
        }
        if self.system_project_label_value.as_deref() == Some(project_id.as_str()) {
            return None;
        }
        Some(project_id.clone())
    }
}

impl ProjectGetter for LabelProjectGetter {
    fn is_project_registration_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.read()?.registration_namespaces.contains_key(namespace))
    }

    fn get_target_project_namespaces(
        &self,
        project_helm_chart: &ProjectHelmChart,
    ) -> Result<Vec<String>> {
        let namespace = project_helm_chart.namespace().unwrap_or_default();
        let index = self.read()?;
        let project_id = index
            .registration_namespaces
            .get(&namespace)
            .ok_or_else(|| {
                Error::ResolutionError(format!(
                    "namespace {} is not a project registration namespace",
                    namespace
                ))
            })?;
        Ok(index
            .project_namespaces
            .get(project_id)
            .map(|namespaces| namespaces.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn on_namespace_change(&self, namespace: &Namespace) -> NamespaceUpdate {
        let name = namespace.name_any();
        let mut update = NamespaceUpdate::default();
        let mut index = self.write();

        if let Some(project_id) = self.registered_project(namespace) {
            index
                .registration_namespaces
                .insert(name.clone(), project_id.clone());
            let labeled_orphaned =
                is_label_true(namespace.labels(), HELM_PROJECT_OPERATED_ORPHANED_LABEL);
            if labeled_orphaned {
                index.orphaned.insert(name.clone());
            } else {
                index.orphaned.remove(&name);
            }
            // Correct registration namespaces whose orphaned label was edited externally
            if index.synced && labeled_orphaned == index.has_targets(&project_id) {
                debug!(namespace = %name, "Registration namespace drifted, reapplying");
                index.registration_for(&project_id, &mut update);
            }
            return update;
        }

        let previous = index.namespace_projects.get(&name).cloned();
        let current = self.target_project(namespace);
        if previous == current {
            return update;
        }

        if previous.is_some() {
            index.untrack(&name);
        }
        if let Some(project_id) = &current {
            index.track(&name, project_id);
        }
        info!(
            namespace = %name,
            previous_project = ?previous,
            project = ?current,
            "Namespace project membership changed"
        );

        if index.synced {
            for project_id in previous.iter().chain(current.iter()) {
                index.registration_for(project_id, &mut update);
            }
        }
        update
    }

    fn on_namespace_remove(&self, namespace: &Namespace) -> NamespaceUpdate {
        let name = namespace.name_any();
        let mut update = NamespaceUpdate::default();
        let mut index = self.write();

        if let Some(project_id) = index.registration_namespaces.remove(&name) {
            index.orphaned.remove(&name);
            // Registration namespaces of live projects are recreated
            if index.synced && index.has_targets(&project_id) {
                info!(namespace = %name, project = %project_id, "Recreating removed registration namespace");
                index.registration_for(&project_id, &mut update);
            }
            return update;
        }

        if let Some(project_id) = index.untrack(&name) {
            info!(namespace = %name, project = %project_id, "Namespace removed from project");
            if index.synced {
                index.registration_for(&project_id, &mut update);
            }
        }
        update
    }

    fn on_initial_sync(&self) -> NamespaceUpdate {
        let mut update = NamespaceUpdate::default();
        let mut index = self.write();
        index.synced = true;

        let mut projects: BTreeSet<String> = index.project_namespaces.keys().cloned().collect();
        projects.extend(index.registration_namespaces.values().cloned());
        for project_id in &projects {
            index.registration_for(project_id, &mut update);
        }

        info!(
            projects = projects.len(),
            registration_namespaces = index.registration_namespaces.len(),
            "Initial namespace sync complete"
        );
        update
    }

    fn registration_counts(&self) -> RegistrationCounts {
        match self.read() {
            Ok(index) => {
                let total = index.registration_namespaces.len();
                let orphaned = index
                    .registration_namespaces
                    .keys()
                    .filter(|name| index.orphaned.contains(*name))
                    .count();
                RegistrationCounts {
                    active: total - orphaned,
                    orphaned,
                }
            }
            Err(_) => RegistrationCounts::default(),
        }
    }
}
