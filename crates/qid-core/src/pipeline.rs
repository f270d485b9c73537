//! Pipeline definitions.

use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::resource::Resource;
use crate::resource_type::ResourceType;
use crate::runner::Runner;

/// A named declarative bundle of jobs, resources, resource types and
/// runners. The raw declaration is stored verbatim so it can be re-decoded
/// with new variable values on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub runners: Vec<Runner>,
    /// Raw pipeline declaration as submitted.
    #[serde(default)]
    pub raw: String,
}

impl Pipeline {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn resource(&self, type_name: &str, name: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.type_name == type_name && r.name == name)
    }

    pub fn resource_by_canonical(&self, canonical: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.canonical == canonical)
    }

    /// Declared resource type with the given name. Built-in fallback is
    /// the caller's concern; see [`crate::builtin::resource_type`].
    pub fn resource_type(&self, name: &str) -> Option<&ResourceType> {
        self.resource_types.iter().find(|rt| rt.name == name)
    }

    pub fn runner(&self, name: &str) -> Option<&Runner> {
        self.runners.iter().find(|r| r.name == name)
    }
}

/// Type of a pipeline variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Bool,
}

/// A named, typed input consumed when decoding a pipeline definition.
/// Values are supplied out-of-band on create/update; the default is used
/// when no value is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_helpers() {
        let pp = Pipeline {
            jobs: vec![Job {
                name: "build".to_string(),
                ..Job::default()
            }],
            resources: vec![Resource {
                type_name: "git".to_string(),
                name: "source".to_string(),
                canonical: "git.source".to_string(),
                ..Resource::default()
            }],
            ..Pipeline::default()
        };

        assert!(pp.job("build").is_some());
        assert!(pp.job("missing").is_none());
        assert!(pp.resource("git", "source").is_some());
        assert!(pp.resource_by_canonical("git.source").is_some());
        assert!(pp.resource_type("git").is_none());
    }
}
