//! The control-plane service contract.
//!
//! The worker and the HTTP transport consume pipelines, builds and
//! resource versions exclusively through this trait; the in-process
//! implementation lives in `qid-service` and an HTTP client
//! implementation lives in `qid-api`.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::build::Build;
use crate::error::Result;
use crate::job::Job;
use crate::pipeline::Pipeline;
use crate::resource::{Resource, Version};

/// Variable values supplied out-of-band when decoding a pipeline.
pub type VariableValues = HashMap<String, serde_json::Value>;

#[async_trait]
pub trait Service: Send + Sync {
    /// Decodes and persists a new pipeline. Validation failures abort
    /// before any write.
    async fn create_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()>;

    /// Re-decodes the pipeline and reconciles every child set against the
    /// new definition.
    async fn update_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()>;

    /// Loads a pipeline with all its children attached.
    async fn get_pipeline(&self, pn: &str) -> Result<Pipeline>;

    /// Loads every pipeline with children attached.
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Cascade-deletes a pipeline and its children.
    async fn delete_pipeline(&self, pn: &str) -> Result<()>;

    /// Publishes a job-run message for a manually triggered job.
    async fn trigger_pipeline_job(&self, pn: &str, jn: &str) -> Result<()>;

    async fn get_pipeline_job(&self, pn: &str, jn: &str) -> Result<Job>;

    /// Persists a new build and returns its per-job monotonic id.
    async fn create_job_build(&self, pn: &str, jn: &str, b: Build) -> Result<u32>;

    async fn update_job_build(&self, pn: &str, jn: &str, bid: u32, b: Build) -> Result<()>;

    async fn delete_job_build(&self, pn: &str, jn: &str, bid: u32) -> Result<()>;

    /// Builds of a job, in creation order.
    async fn filter_job_builds(&self, pn: &str, jn: &str) -> Result<Vec<Build>>;

    /// Persists mutable resource state (`last_check`, `logs`).
    async fn update_resource(&self, pn: &str, r: Resource) -> Result<()>;

    /// Appends a version and returns its id.
    async fn create_resource_version(
        &self,
        pn: &str,
        rt: &str,
        rn: &str,
        v: Version,
    ) -> Result<u32>;

    /// Versions of a resource, in insertion order.
    async fn filter_resource_versions(&self, pn: &str, rt: &str, rn: &str)
        -> Result<Vec<Version>>;
}
