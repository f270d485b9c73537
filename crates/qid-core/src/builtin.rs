//! Built-in resource types.
//!
//! The `exec` runner and the `cron` resource type are always available
//! without being declared in a pipeline. A pipeline that declares a
//! runner or resource type with the same name shadows the built-in.

use crate::pipeline::Pipeline;
use crate::resource_type::ResourceType;
use crate::runner::RunnerCommand;

/// Name of the built-in `cron` resource type. Its check produces one
/// version carrying the current timestamp; its pull is a no-op.
pub const CRON_RESOURCE_TYPE: &str = "cron";

/// Key of the timestamp field in versions produced by `cron` checks.
pub const CRON_TIMESTAMP_KEY: &str = "timestamp";

/// The built-in `cron` resource type. The check and pull commands carry
/// the `cron` runner name as a marker; the worker short-circuits them
/// instead of spawning a process.
pub fn cron_resource_type() -> ResourceType {
    ResourceType {
        id: 0,
        name: CRON_RESOURCE_TYPE.to_string(),
        params: Vec::new(),
        check: RunnerCommand {
            runner: CRON_RESOURCE_TYPE.to_string(),
            params: Default::default(),
        },
        pull: RunnerCommand {
            runner: CRON_RESOURCE_TYPE.to_string(),
            params: Default::default(),
        },
        push: RunnerCommand::default(),
    }
}

/// Resolves a resource type by name, falling back to the built-ins when
/// the pipeline does not declare one.
pub fn resource_type(pp: &Pipeline, name: &str) -> Option<ResourceType> {
    if let Some(rt) = pp.resource_type(name) {
        return Some(rt.clone());
    }
    if name == CRON_RESOURCE_TYPE {
        return Some(cron_resource_type());
    }
    None
}

/// True when the resolved resource type is the undeclared built-in cron,
/// whose commands are executed in-process.
pub fn is_builtin_cron(pp: &Pipeline, rt: &ResourceType) -> bool {
    rt.name == CRON_RESOURCE_TYPE && pp.resource_type(CRON_RESOURCE_TYPE).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_fallback() {
        let pp = Pipeline::default();
        let rt = resource_type(&pp, "cron").unwrap();
        assert_eq!(rt.name, "cron");
        assert!(is_builtin_cron(&pp, &rt));
        assert!(resource_type(&pp, "git").is_none());
    }

    #[test]
    fn test_declared_type_shadows_builtin() {
        let pp = Pipeline {
            resource_types: vec![ResourceType {
                name: "cron".to_string(),
                ..ResourceType::default()
            }],
            ..Pipeline::default()
        };
        let rt = resource_type(&pp, "cron").unwrap();
        assert!(!is_builtin_cron(&pp, &rt));
    }
}
