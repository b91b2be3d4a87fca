//! HelmRelease resource consumed by helm-locker

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Locks an installed Helm release against configuration drift
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "helm.cattle.io",
    version = "v1alpha1",
    kind = "HelmRelease",
    plural = "helmreleases",
    singular = "helmrelease",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseSpec {
    /// Release to lock
    pub release: ReleaseKey,
}

/// Identifies a Helm release
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseKey {
    /// Release name
    pub name: String,

    /// Release namespace
    pub namespace: String,
}
