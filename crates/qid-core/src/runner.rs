//! Runner definitions.
//!
//! A runner is a named way to execute an external process. Its path and
//! args are templates expanded against a parameter map by the worker's
//! runner executor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the built-in `exec` runner, always available without being
/// declared. See [`Runner::exec`].
pub const EXEC_RUNNER: &str = "exec";

/// A named runner definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    pub run: RunCommand,
}

/// A path template plus args templates. Templates substitute `$NAME` /
/// `${NAME}` from the execution environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCommand {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A reference to a runner together with the parameters to expand its
/// templates with. Resource type actions and task steps are both runner
/// commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerCommand {
    pub runner: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Runner {
    /// Materializes the built-in `exec` runner for a command's parameter
    /// map: the path template is `params["path"]` and the single args
    /// template is `params["args"]`, so both are expanded as written.
    pub fn exec(params: &HashMap<String, String>) -> Runner {
        Runner {
            id: 0,
            name: EXEC_RUNNER.to_string(),
            run: RunCommand {
                path: params.get("path").cloned().unwrap_or_default(),
                args: params.get("args").cloned().into_iter().collect(),
            },
        }
    }
}
