//! Repository contracts.
//!
//! Each trait is a narrow port: create, update, find-by-key,
//! filter-by-parent, delete. Keys are the parent pipeline name plus the
//! entity's own identity. All operations are async and return promptly on
//! cancellation (future drop).

use async_trait::async_trait;

use crate::error::StoreResult;
use qid_core::{Build, Job, Pipeline, Resource, ResourceType, Runner, Version};

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Persists the pipeline row (children excluded) and returns its id.
    async fn create(&self, pp: Pipeline) -> StoreResult<u32>;
    async fn update(&self, pn: &str, pp: Pipeline) -> StoreResult<()>;
    async fn find(&self, pn: &str) -> StoreResult<Pipeline>;
    async fn filter(&self) -> StoreResult<Vec<Pipeline>>;
    /// Cascade-deletes the pipeline and every child row.
    async fn delete(&self, pn: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, pn: &str, j: Job) -> StoreResult<u32>;
    async fn update(&self, pn: &str, jn: &str, j: Job) -> StoreResult<()>;
    async fn find(&self, pn: &str, jn: &str) -> StoreResult<Job>;
    async fn filter(&self, pn: &str) -> StoreResult<Vec<Job>>;
    async fn delete(&self, pn: &str, jn: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ResourceRepo: Send + Sync {
    async fn create(&self, pn: &str, r: Resource) -> StoreResult<u32>;
    async fn update(&self, pn: &str, rt: &str, rn: &str, r: Resource) -> StoreResult<()>;
    async fn find(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<Resource>;
    async fn filter(&self, pn: &str) -> StoreResult<Vec<Resource>>;
    async fn delete(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<()>;

    /// Appends a version; ids are strictly increasing per resource and
    /// never reused.
    async fn create_version(&self, pn: &str, rt: &str, rn: &str, v: Version) -> StoreResult<u32>;
    /// Versions in insertion order.
    async fn filter_versions(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<Vec<Version>>;
}

#[async_trait]
pub trait ResourceTypeRepo: Send + Sync {
    async fn create(&self, pn: &str, rt: ResourceType) -> StoreResult<u32>;
    async fn update(&self, pn: &str, tn: &str, rt: ResourceType) -> StoreResult<()>;
    async fn find(&self, pn: &str, tn: &str) -> StoreResult<ResourceType>;
    async fn filter(&self, pn: &str) -> StoreResult<Vec<ResourceType>>;
    async fn delete(&self, pn: &str, tn: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait RunnerRepo: Send + Sync {
    async fn create(&self, pn: &str, ru: Runner) -> StoreResult<u32>;
    async fn update(&self, pn: &str, run: &str, ru: Runner) -> StoreResult<()>;
    async fn find(&self, pn: &str, run: &str) -> StoreResult<Runner>;
    async fn filter(&self, pn: &str) -> StoreResult<Vec<Runner>>;
    async fn delete(&self, pn: &str, run: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Persists the build under the next per-job monotonic id and
    /// returns it.
    async fn create(&self, pn: &str, jn: &str, b: Build) -> StoreResult<u32>;
    async fn update(&self, pn: &str, jn: &str, bid: u32, b: Build) -> StoreResult<()>;
    async fn find(&self, pn: &str, jn: &str, bid: u32) -> StoreResult<Build>;
    /// Builds in creation order.
    async fn filter(&self, pn: &str, jn: &str) -> StoreResult<Vec<Build>>;
    async fn delete(&self, pn: &str, jn: &str, bid: u32) -> StoreResult<()>;
}
