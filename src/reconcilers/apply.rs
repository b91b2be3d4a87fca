//! Applying desired state to the cluster
//!
//! Derived resources are server-side applied; resources previously generated
//! for the same ProjectHelmChart that are no longer desired are pruned.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::common::labels::HELM_PROJECT_OPERATED_LABEL;
use crate::crd::{HelmChart, HelmRelease};
use crate::reconcilers::project_helm_chart::DesiredResources;
use crate::reconcilers::resync::is_owned_by;
use crate::{Error, Result};

/// Field manager used for all server-side applies
pub const FIELD_MANAGER: &str = "helm-project-operator";

/// Apply the derived resources of a ProjectHelmChart and prune stale ones
pub async fn apply_desired(
    client: &Client,
    system_namespace: &str,
    owner_namespace: &str,
    owner_name: &str,
    desired: &DesiredResources,
) -> Result<()> {
    apply_owned::<HelmChart>(
        client,
        system_namespace,
        owner_namespace,
        owner_name,
        desired.helm_chart.as_ref(),
    )
    .await?;
    apply_owned::<HelmRelease>(
        client,
        system_namespace,
        owner_namespace,
        owner_name,
        desired.helm_release.as_ref(),
    )
    .await?;
    Ok(())
}

/// Remove every resource derived from a ProjectHelmChart
pub async fn delete_derived(
    client: &Client,
    system_namespace: &str,
    owner_namespace: &str,
    owner_name: &str,
) -> Result<()> {
    apply_desired(
        client,
        system_namespace,
        owner_namespace,
        owner_name,
        &DesiredResources::default(),
    )
    .await
}

async fn apply_owned<K>(
    client: &Client,
    system_namespace: &str,
    owner_namespace: &str,
    owner_name: &str,
    desired: Option<&K>,
) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let api: Api<K> = Api::namespaced(client.clone(), system_namespace);
    let kind = K::kind(&());
    let desired_name = desired.map(|obj| obj.name_any());

    if let Some(obj) = desired {
        let name = obj.name_any();
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(obj),
        )
        .await
        .map_err(|e| Error::KubeError(format!("Failed to create/update {}: {}", kind, e)))?;
        info!("Reconciled {} {}/{}", kind, system_namespace, name);
    }

    let operated = ListParams::default().labels(&format!("{}=true", HELM_PROJECT_OPERATED_LABEL));
    let existing = api
        .list(&operated)
        .await
        .map_err(|e| Error::KubeError(format!("Failed to list {}: {}", kind, e)))?;

    for stale in existing.items.iter().filter(|obj| {
        is_owned_by(obj.annotations(), owner_namespace, owner_name)
            && Some(obj.name_any()) != desired_name
    }) {
        let name = stale.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!("Pruned {} {}/{}", kind, system_namespace, name),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                return Err(Error::KubeError(format!(
                    "Failed to delete {} {}: {}",
                    kind, name, e
                )))
            }
        }
    }

    Ok(())
}

/// Server-side apply a cluster-scoped Namespace
pub async fn apply_namespace(client: &Client, namespace: &Namespace) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let name = namespace.name_any();
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(namespace),
    )
    .await
    .map_err(|e| Error::KubeError(format!("Failed to create/update Namespace: {}", e)))?;
    info!("Reconciled Namespace {}", name);
    Ok(())
}

/// Server-side apply a ConfigMap
pub async fn apply_config_map(client: &Client, config_map: &ConfigMap) -> Result<()> {
    let namespace = config_map.namespace().unwrap_or_default();
    let name = config_map.name_any();
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(config_map),
    )
    .await
    .map_err(|e| Error::KubeError(format!("Failed to create/update ConfigMap: {}", e)))?;
    info!("Reconciled ConfigMap {}/{}", namespace, name);
    Ok(())
}
