//! Resource type definitions.

use serde::{Deserialize, Serialize};

use crate::runner::RunnerCommand;

/// A named template describing how to check, pull and push resources of
/// its kind. `params` lists the parameter names that flow through from
/// resource instances into the commands (as `param_<name>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub check: RunnerCommand,
    #[serde(default)]
    pub pull: RunnerCommand,
    #[serde(default)]
    pub push: RunnerCommand,
}
