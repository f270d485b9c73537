//! Resource and resource version definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An instance of a resource type, identified inside its pipeline by the
/// canonical `type.name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: u32,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub canonical: String,
    /// User-supplied parameters, filtered through the type's `params`
    /// list when building command environments.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Duration literal such as `1m`. The scheduler falls back to `1m`
    /// when unset.
    #[serde(default)]
    pub check_interval: Option<String>,
    /// When the scheduler last emitted a check for this resource.
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    /// Most recent check failure output; cleared on the next successful
    /// check.
    #[serde(default)]
    pub logs: String,
}

/// An immutable, append-only record discovered by a resource check. The
/// payload is opaque to the engine; ids are strictly increasing per
/// resource and never reused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}
