//! Job and step definitions.

use serde::{Deserialize, Serialize};

use crate::canonical::resource_canonical;
use crate::runner::RunnerCommand;

/// An ordered sequence of get and task steps, with success/failure/ensure
/// hooks at both step and job level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub gets: Vec<GetStep>,
    #[serde(default)]
    pub tasks: Vec<TaskStep>,
    #[serde(default)]
    pub on_success: Vec<RunnerCommand>,
    #[serde(default)]
    pub on_failure: Vec<RunnerCommand>,
    #[serde(default)]
    pub ensure: Vec<RunnerCommand>,
}

/// An input step: pulls a resource before the tasks run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetStep {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    /// Jobs whose latest build must have succeeded for this job to run.
    #[serde(default)]
    pub passed: Vec<String>,
    /// When true, new versions of the resource enqueue this job.
    #[serde(default)]
    pub trigger: bool,
    #[serde(default)]
    pub on_success: Vec<RunnerCommand>,
    #[serde(default)]
    pub on_failure: Vec<RunnerCommand>,
    #[serde(default)]
    pub ensure: Vec<RunnerCommand>,
}

impl GetStep {
    /// Canonical of the resource this step pulls.
    pub fn resource_canonical(&self) -> String {
        resource_canonical(&self.type_name, &self.name)
    }
}

/// A command step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub name: String,
    #[serde(flatten)]
    pub command: RunnerCommand,
    #[serde(default)]
    pub on_success: Vec<RunnerCommand>,
    #[serde(default)]
    pub on_failure: Vec<RunnerCommand>,
    #[serde(default)]
    pub ensure: Vec<RunnerCommand>,
}
