//! Command parameter assembly.

use std::collections::HashMap;

use qid_core::{Resource, ResourceType, Version};

/// Builds the parameter map for a resource-type command: the command's
/// own params, `version_<k>` entries from the bound version, and
/// `param_<k>` entries for every type parameter the resource supplies.
pub(crate) fn command_params(
    base: &HashMap<String, String>,
    version: Option<&Version>,
    rt: &ResourceType,
    r: &Resource,
) -> HashMap<String, String> {
    let mut params = base.clone();
    if let Some(v) = version {
        for (k, value) in &v.payload {
            params.insert(format!("version_{}", k), stringify(value));
        }
    }
    for k in &rt.params {
        if let Some(value) = r.params.get(k) {
            params.insert(format!("param_{}", k), value.clone());
        }
    }
    params
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
