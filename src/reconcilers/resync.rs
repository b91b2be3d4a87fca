//! Mapping changes of derived resources back to their ProjectHelmChart

use std::collections::BTreeMap;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::debug;

use crate::common::labels::{OWNER_NAMESPACE_ANNOTATION, OWNER_NAME_ANNOTATION};
use crate::crd::ProjectHelmChart;
use crate::resolver::ProjectGetter;

/// Whether owner-link annotations point at the given ProjectHelmChart
pub fn is_owned_by(
    annotations: &BTreeMap<String, String>,
    owner_namespace: &str,
    owner_name: &str,
) -> bool {
    annotations.get(OWNER_NAMESPACE_ANNOTATION).map(String::as_str) == Some(owner_namespace)
        && annotations.get(OWNER_NAME_ANNOTATION).map(String::as_str) == Some(owner_name)
}

/// ProjectHelmChart that generated `obj`, as long as it lives in a project
/// registration namespace. Anything else yields nothing.
pub fn resolve_owner<K: ResourceExt>(
    obj: &K,
    project_getter: &dyn ProjectGetter,
) -> Option<ObjectRef<ProjectHelmChart>> {
    let annotations = obj.annotations();
    let namespace = annotations.get(OWNER_NAMESPACE_ANNOTATION)?;
    let name = annotations.get(OWNER_NAME_ANNOTATION)?;

    match project_getter.is_project_registration_namespace(namespace) {
        Ok(true) => {
            debug!(
                owner_namespace = %namespace,
                owner_name = %name,
                object = %obj.name_any(),
                "Derived resource changed, resyncing owner"
            );
            Some(ObjectRef::new(name).within(namespace))
        }
        Ok(false) => None,
        Err(e) => {
            debug!(error = %e, "Unable to resolve owner of derived resource");
            None
        }
    }
}
