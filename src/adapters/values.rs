//! Merging tenant values with the context injected by the operator

use serde_json::Value;

use crate::common::Options;
use crate::crd::GenericMap;
use crate::{Error, Result};

/// Key under which every injected value lives
pub const GLOBAL_KEY: &str = "global";

/// Key under `global` holding the injected cluster context
pub const CATTLE_KEY: &str = "cattle";

/// Key under `global.cattle` listing the namespaces targeted by the project
pub const PROJECT_NAMESPACES_KEY: &str = "projectNamespaces";

/// Deep-merge `overlay` into `base`.
///
/// Nested maps are merged key by key; any other value in `overlay` replaces the
/// one in `base`. Keys only present in `base` are kept untouched.
pub fn merge_maps(base: &GenericMap, overlay: &GenericMap) -> GenericMap {
    let mut merged = base.clone();
    for (key, overlay_value) in overlay {
        let value = match (merged.get(key), overlay_value) {
            (Some(Value::Object(base_map)), Value::Object(overlay_map)) => {
                Value::Object(merge_maps(base_map, overlay_map))
            }
            _ => overlay_value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

/// Values injected into every chart under `global.cattle`
pub fn injected_values(target_namespaces: &[String], opts: &Options) -> GenericMap {
    let mut cattle = GenericMap::new();
    cattle.insert(
        PROJECT_NAMESPACES_KEY.to_string(),
        Value::Array(
            target_namespaces
                .iter()
                .map(|ns| Value::String(ns.clone()))
                .collect(),
        ),
    );
    if let Some(registry) = &opts.system_default_registry {
        cattle.insert(
            "systemDefaultRegistry".to_string(),
            Value::String(registry.clone()),
        );
    }
    if let Some(url) = &opts.cattle_url {
        cattle.insert("url".to_string(), Value::String(url.clone()));
    }
    if let Some(cluster_id) = &opts.cluster_id {
        cattle.insert("clusterId".to_string(), Value::String(cluster_id.clone()));
    }

    let mut global = GenericMap::new();
    global.insert(CATTLE_KEY.to_string(), Value::Object(cattle));

    let mut injected = GenericMap::new();
    injected.insert(GLOBAL_KEY.to_string(), Value::Object(global));
    injected
}

/// Tenant values with the operator's context merged in
pub fn merge_values(
    values: Option<&GenericMap>,
    target_namespaces: &[String],
    opts: &Options,
) -> GenericMap {
    let base = values.cloned().unwrap_or_default();
    merge_maps(&base, &injected_values(target_namespaces, opts))
}

/// Render merged values as the values.yaml handed to helm
pub fn to_values_content(values: &GenericMap) -> Result<String> {
    serde_yaml::to_string(values)
        .map_err(|e| Error::SerializationError(format!("Failed to serialize values: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> GenericMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn merge_keeps_unrelated_nested_keys() {
        let base = map(json!({"global": {"cattle": {"foo": "bar"}, "other": 1}, "image": "x"}));
        let overlay = map(json!({"global": {"cattle": {"projectNamespaces": ["a"]}}}));

        let merged = merge_maps(&base, &overlay);

        assert_eq!(
            Value::Object(merged),
            json!({
                "global": {"cattle": {"foo": "bar", "projectNamespaces": ["a"]}, "other": 1},
                "image": "x"
            })
        );
    }

    #[test]
    fn overlay_replaces_non_map_values() {
        let base = map(json!({"global": "scalar"}));
        let overlay = map(json!({"global": {"cattle": {}}}));
        assert_eq!(
            Value::Object(merge_maps(&base, &overlay)),
            json!({"global": {"cattle": {}}})
        );
    }
}
