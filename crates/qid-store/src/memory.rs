//! In-memory store.
//!
//! Backs every repository trait with a single `RwLock`-guarded table set.
//! Ids come from process-lifetime counters and are never reused, so
//! version and build ids stay strictly increasing even across deletes.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::repo::{BuildRepo, JobRepo, PipelineRepo, ResourceRepo, ResourceTypeRepo, RunnerRepo};
use qid_core::{Build, Job, Pipeline, Resource, ResourceType, Runner, Version};

/// Shared in-memory store. Clones share the same tables; hand one clone
/// per repository handle.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

struct Child<T> {
    pipeline: String,
    row: T,
}

struct BuildRow {
    pipeline: String,
    job: String,
    build: Build,
}

struct VersionRow {
    pipeline: String,
    type_name: String,
    name: String,
    version: Version,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    pipelines: Vec<Pipeline>,
    jobs: Vec<Child<Job>>,
    resources: Vec<Child<Resource>>,
    resource_types: Vec<Child<ResourceType>>,
    runners: Vec<Child<Runner>>,
    builds: Vec<BuildRow>,
    versions: Vec<VersionRow>,
    build_seq: HashMap<(String, String), u32>,
    version_seq: HashMap<(String, String, String), u32>,
}

impl Inner {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn pipeline_exists(&self, pn: &str) -> bool {
        self.pipelines.iter().any(|p| p.name == pn)
    }

    fn require_pipeline(&self, pn: &str) -> StoreResult<()> {
        if self.pipeline_exists(pn) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("pipeline {:?}", pn)))
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineRepo for MemoryStore {
    async fn create(&self, mut pp: Pipeline) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        if inner.pipeline_exists(&pp.name) {
            return Err(StoreError::Conflict(format!("pipeline {:?}", pp.name)));
        }
        let id = inner.next_id();
        pp.id = id;
        // Children live in their own tables.
        pp.jobs.clear();
        pp.resources.clear();
        pp.resource_types.clear();
        pp.runners.clear();
        inner.pipelines.push(pp);
        Ok(id)
    }

    async fn update(&self, pn: &str, mut pp: Pipeline) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .pipelines
            .iter_mut()
            .find(|p| p.name == pn)
            .ok_or_else(|| StoreError::NotFound(format!("pipeline {:?}", pn)))?;
        pp.id = row.id;
        pp.name = pn.to_string();
        pp.jobs.clear();
        pp.resources.clear();
        pp.resource_types.clear();
        pp.runners.clear();
        *row = pp;
        Ok(())
    }

    async fn find(&self, pn: &str) -> StoreResult<Pipeline> {
        let inner = self.inner.read();
        inner
            .pipelines
            .iter()
            .find(|p| p.name == pn)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pipeline {:?}", pn)))
    }

    async fn filter(&self) -> StoreResult<Vec<Pipeline>> {
        Ok(self.inner.read().pipelines.to_vec())
    }

    async fn delete(&self, pn: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.pipelines.len();
        inner.pipelines.retain(|p| p.name != pn);
        if inner.pipelines.len() == before {
            return Err(StoreError::NotFound(format!("pipeline {:?}", pn)));
        }
        inner.jobs.retain(|c| c.pipeline != pn);
        inner.resources.retain(|c| c.pipeline != pn);
        inner.resource_types.retain(|c| c.pipeline != pn);
        inner.runners.retain(|c| c.pipeline != pn);
        inner.builds.retain(|b| b.pipeline != pn);
        inner.versions.retain(|v| v.pipeline != pn);
        Ok(())
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn create(&self, pn: &str, mut j: Job) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        inner.require_pipeline(pn)?;
        if inner
            .jobs
            .iter()
            .any(|c| c.pipeline == pn && c.row.name == j.name)
        {
            return Err(StoreError::Conflict(format!("job {:?}", j.name)));
        }
        let id = inner.next_id();
        j.id = id;
        inner.jobs.push(Child {
            pipeline: pn.to_string(),
            row: j,
        });
        Ok(id)
    }

    async fn update(&self, pn: &str, jn: &str, mut j: Job) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .jobs
            .iter_mut()
            .find(|c| c.pipeline == pn && c.row.name == jn)
            .ok_or_else(|| StoreError::NotFound(format!("job {:?}", jn)))?;
        j.id = row.row.id;
        row.row = j;
        Ok(())
    }

    async fn find(&self, pn: &str, jn: &str) -> StoreResult<Job> {
        self.inner
            .read()
            .jobs
            .iter()
            .find(|c| c.pipeline == pn && c.row.name == jn)
            .map(|c| c.row.clone())
            .ok_or_else(|| StoreError::NotFound(format!("job {:?}", jn)))
    }

    async fn filter(&self, pn: &str) -> StoreResult<Vec<Job>> {
        Ok(self
            .inner
            .read()
            .jobs
            .iter()
            .filter(|c| c.pipeline == pn)
            .map(|c| c.row.clone())
            .collect())
    }

    async fn delete(&self, pn: &str, jn: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|c| !(c.pipeline == pn && c.row.name == jn));
        if inner.jobs.len() == before {
            return Err(StoreError::NotFound(format!("job {:?}", jn)));
        }
        inner.builds.retain(|b| !(b.pipeline == pn && b.job == jn));
        Ok(())
    }
}

#[async_trait]
impl ResourceRepo for MemoryStore {
    async fn create(&self, pn: &str, mut r: Resource) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        inner.require_pipeline(pn)?;
        if inner
            .resources
            .iter()
            .any(|c| c.pipeline == pn && c.row.type_name == r.type_name && c.row.name == r.name)
        {
            return Err(StoreError::Conflict(format!("resource {:?}", r.canonical)));
        }
        let id = inner.next_id();
        r.id = id;
        inner.resources.push(Child {
            pipeline: pn.to_string(),
            row: r,
        });
        Ok(id)
    }

    async fn update(&self, pn: &str, rt: &str, rn: &str, mut r: Resource) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .resources
            .iter_mut()
            .find(|c| c.pipeline == pn && c.row.type_name == rt && c.row.name == rn)
            .ok_or_else(|| StoreError::NotFound(format!("resource {}.{}", rt, rn)))?;
        r.id = row.row.id;
        row.row = r;
        Ok(())
    }

    async fn find(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<Resource> {
        self.inner
            .read()
            .resources
            .iter()
            .find(|c| c.pipeline == pn && c.row.type_name == rt && c.row.name == rn)
            .map(|c| c.row.clone())
            .ok_or_else(|| StoreError::NotFound(format!("resource {}.{}", rt, rn)))
    }

    async fn filter(&self, pn: &str) -> StoreResult<Vec<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .iter()
            .filter(|c| c.pipeline == pn)
            .map(|c| c.row.clone())
            .collect())
    }

    async fn delete(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.resources.len();
        inner
            .resources
            .retain(|c| !(c.pipeline == pn && c.row.type_name == rt && c.row.name == rn));
        if inner.resources.len() == before {
            return Err(StoreError::NotFound(format!("resource {}.{}", rt, rn)));
        }
        inner
            .versions
            .retain(|v| !(v.pipeline == pn && v.type_name == rt && v.name == rn));
        Ok(())
    }

    async fn create_version(&self, pn: &str, rt: &str, rn: &str, mut v: Version) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        if !inner
            .resources
            .iter()
            .any(|c| c.pipeline == pn && c.row.type_name == rt && c.row.name == rn)
        {
            return Err(StoreError::NotFound(format!("resource {}.{}", rt, rn)));
        }
        let key = (pn.to_string(), rt.to_string(), rn.to_string());
        let seq = inner.version_seq.entry(key).or_insert(0);
        *seq += 1;
        v.id = *seq;
        let id = v.id;
        inner.versions.push(VersionRow {
            pipeline: pn.to_string(),
            type_name: rt.to_string(),
            name: rn.to_string(),
            version: v,
        });
        Ok(id)
    }

    async fn filter_versions(&self, pn: &str, rt: &str, rn: &str) -> StoreResult<Vec<Version>> {
        Ok(self
            .inner
            .read()
            .versions
            .iter()
            .filter(|v| v.pipeline == pn && v.type_name == rt && v.name == rn)
            .map(|v| v.version.clone())
            .collect())
    }
}

#[async_trait]
impl ResourceTypeRepo for MemoryStore {
    async fn create(&self, pn: &str, mut rt: ResourceType) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        inner.require_pipeline(pn)?;
        if inner
            .resource_types
            .iter()
            .any(|c| c.pipeline == pn && c.row.name == rt.name)
        {
            return Err(StoreError::Conflict(format!("resource type {:?}", rt.name)));
        }
        let id = inner.next_id();
        rt.id = id;
        inner.resource_types.push(Child {
            pipeline: pn.to_string(),
            row: rt,
        });
        Ok(id)
    }

    async fn update(&self, pn: &str, tn: &str, mut rt: ResourceType) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .resource_types
            .iter_mut()
            .find(|c| c.pipeline == pn && c.row.name == tn)
            .ok_or_else(|| StoreError::NotFound(format!("resource type {:?}", tn)))?;
        rt.id = row.row.id;
        row.row = rt;
        Ok(())
    }

    async fn find(&self, pn: &str, tn: &str) -> StoreResult<ResourceType> {
        self.inner
            .read()
            .resource_types
            .iter()
            .find(|c| c.pipeline == pn && c.row.name == tn)
            .map(|c| c.row.clone())
            .ok_or_else(|| StoreError::NotFound(format!("resource type {:?}", tn)))
    }

    async fn filter(&self, pn: &str) -> StoreResult<Vec<ResourceType>> {
        Ok(self
            .inner
            .read()
            .resource_types
            .iter()
            .filter(|c| c.pipeline == pn)
            .map(|c| c.row.clone())
            .collect())
    }

    async fn delete(&self, pn: &str, tn: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.resource_types.len();
        inner
            .resource_types
            .retain(|c| !(c.pipeline == pn && c.row.name == tn));
        if inner.resource_types.len() == before {
            return Err(StoreError::NotFound(format!("resource type {:?}", tn)));
        }
        Ok(())
    }
}

#[async_trait]
impl RunnerRepo for MemoryStore {
    async fn create(&self, pn: &str, mut ru: Runner) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        inner.require_pipeline(pn)?;
        if inner
            .runners
            .iter()
            .any(|c| c.pipeline == pn && c.row.name == ru.name)
        {
            return Err(StoreError::Conflict(format!("runner {:?}", ru.name)));
        }
        let id = inner.next_id();
        ru.id = id;
        inner.runners.push(Child {
            pipeline: pn.to_string(),
            row: ru,
        });
        Ok(id)
    }

    async fn update(&self, pn: &str, run: &str, mut ru: Runner) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .runners
            .iter_mut()
            .find(|c| c.pipeline == pn && c.row.name == run)
            .ok_or_else(|| StoreError::NotFound(format!("runner {:?}", run)))?;
        ru.id = row.row.id;
        row.row = ru;
        Ok(())
    }

    async fn find(&self, pn: &str, run: &str) -> StoreResult<Runner> {
        self.inner
            .read()
            .runners
            .iter()
            .find(|c| c.pipeline == pn && c.row.name == run)
            .map(|c| c.row.clone())
            .ok_or_else(|| StoreError::NotFound(format!("runner {:?}", run)))
    }

    async fn filter(&self, pn: &str) -> StoreResult<Vec<Runner>> {
        Ok(self
            .inner
            .read()
            .runners
            .iter()
            .filter(|c| c.pipeline == pn)
            .map(|c| c.row.clone())
            .collect())
    }

    async fn delete(&self, pn: &str, run: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.runners.len();
        inner
            .runners
            .retain(|c| !(c.pipeline == pn && c.row.name == run));
        if inner.runners.len() == before {
            return Err(StoreError::NotFound(format!("runner {:?}", run)));
        }
        Ok(())
    }
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create(&self, pn: &str, jn: &str, mut b: Build) -> StoreResult<u32> {
        let mut inner = self.inner.write();
        if !inner
            .jobs
            .iter()
            .any(|c| c.pipeline == pn && c.row.name == jn)
        {
            return Err(StoreError::NotFound(format!("job {:?}", jn)));
        }
        let key = (pn.to_string(), jn.to_string());
        let seq = inner.build_seq.entry(key).or_insert(0);
        *seq += 1;
        b.id = *seq;
        let id = b.id;
        inner.builds.push(BuildRow {
            pipeline: pn.to_string(),
            job: jn.to_string(),
            build: b,
        });
        Ok(id)
    }

    async fn update(&self, pn: &str, jn: &str, bid: u32, mut b: Build) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .builds
            .iter_mut()
            .find(|r| r.pipeline == pn && r.job == jn && r.build.id == bid)
            .ok_or_else(|| StoreError::NotFound(format!("build {} of job {:?}", bid, jn)))?;
        b.id = bid;
        row.build = b;
        Ok(())
    }

    async fn find(&self, pn: &str, jn: &str, bid: u32) -> StoreResult<Build> {
        self.inner
            .read()
            .builds
            .iter()
            .find(|r| r.pipeline == pn && r.job == jn && r.build.id == bid)
            .map(|r| r.build.clone())
            .ok_or_else(|| StoreError::NotFound(format!("build {} of job {:?}", bid, jn)))
    }

    async fn filter(&self, pn: &str, jn: &str) -> StoreResult<Vec<Build>> {
        Ok(self
            .inner
            .read()
            .builds
            .iter()
            .filter(|r| r.pipeline == pn && r.job == jn)
            .map(|r| r.build.clone())
            .collect())
    }

    async fn delete(&self, pn: &str, jn: &str, bid: u32) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.builds.len();
        inner
            .builds
            .retain(|r| !(r.pipeline == pn && r.job == jn && r.build.id == bid));
        if inner.builds.len() == before {
            return Err(StoreError::NotFound(format!("build {} of job {:?}", bid, jn)));
        }
        Ok(())
    }
}
