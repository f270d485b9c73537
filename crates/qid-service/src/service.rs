//! The pipeline service.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use qid_core::canonical::{is_valid_name, is_valid_resource_canonical};
use qid_core::service::VariableValues;
use qid_core::{Body, Build, Error, Job, Pipeline, Resource, Result, Service, Version};
use qid_queue::Topic;
use qid_store::{BuildRepo, JobRepo, PipelineRepo, ResourceRepo, ResourceTypeRepo, RunnerRepo};

/// The control-plane service. Holds the topic and one handle per
/// repository; no other state.
pub struct Qid {
    topic: Arc<dyn Topic>,
    pipelines: Arc<dyn PipelineRepo>,
    jobs: Arc<dyn JobRepo>,
    resources: Arc<dyn ResourceRepo>,
    resource_types: Arc<dyn ResourceTypeRepo>,
    runners: Arc<dyn RunnerRepo>,
    builds: Arc<dyn BuildRepo>,
}

impl Qid {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: Arc<dyn Topic>,
        pipelines: Arc<dyn PipelineRepo>,
        jobs: Arc<dyn JobRepo>,
        resources: Arc<dyn ResourceRepo>,
        resource_types: Arc<dyn ResourceTypeRepo>,
        runners: Arc<dyn RunnerRepo>,
        builds: Arc<dyn BuildRepo>,
    ) -> Qid {
        Qid {
            topic,
            pipelines,
            jobs,
            resources,
            resource_types,
            runners,
            builds,
        }
    }

    async fn send(&self, body: &Body) -> Result<()> {
        let raw = body
            .encode()
            .map_err(|err| Error::Transport(err.to_string()))?;
        self.topic
            .send(raw)
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }

    async fn attach_children(&self, mut pp: Pipeline) -> Result<Pipeline> {
        let (jobs, resources, resource_types, runners) = tokio::join!(
            self.jobs.filter(&pp.name),
            self.resources.filter(&pp.name),
            self.resource_types.filter(&pp.name),
            self.runners.filter(&pp.name),
        );
        pp.jobs = jobs?;
        pp.resources = resources?;
        pp.resource_types = resource_types?;
        pp.runners = runners?;
        Ok(pp)
    }
}

/// Slug-shape checks for every name in a decoded pipeline. Runs before
/// any write so an invalid definition never persists partially.
fn validate_names(pn: &str, pp: &Pipeline) -> Result<()> {
    if !is_valid_name(pn) {
        return Err(Error::InvalidInput(format!(
            "invalid pipeline name format {:?}",
            pn
        )));
    }
    for j in &pp.jobs {
        if !is_valid_name(&j.name) {
            return Err(Error::InvalidInput(format!(
                "invalid job name format {:?}",
                j.name
            )));
        }
    }
    for rt in &pp.resource_types {
        if !is_valid_name(&rt.name) {
            return Err(Error::InvalidInput(format!(
                "invalid resource type name format {:?}",
                rt.name
            )));
        }
    }
    for r in &pp.resources {
        if !is_valid_resource_canonical(&r.canonical) {
            return Err(Error::InvalidInput(format!(
                "invalid resource canonical format {:?}",
                r.canonical
            )));
        }
    }
    for ru in &pp.runners {
        if !is_valid_name(&ru.name) {
            return Err(Error::InvalidInput(format!(
                "invalid runner name format {:?}",
                ru.name
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Service for Qid {
    async fn create_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()> {
        if !is_valid_name(pn) {
            return Err(Error::InvalidInput(format!(
                "invalid pipeline name format {:?}",
                pn
            )));
        }
        let mut pp = qid_config::decode(raw, vars)?;
        pp.name = pn.to_string();
        validate_names(pn, &pp)?;

        self.pipelines.create(pp.clone()).await?;
        for j in &pp.jobs {
            self.jobs.create(pn, j.clone()).await?;
        }
        for rt in &pp.resource_types {
            self.resource_types.create(pn, rt.clone()).await?;
        }
        for r in &pp.resources {
            self.resources.create(pn, r.clone()).await?;
        }
        for ru in &pp.runners {
            self.runners.create(pn, ru.clone()).await?;
        }
        Ok(())
    }

    async fn update_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()> {
        let mut pp = qid_config::decode(raw, vars)?;
        pp.name = pn.to_string();
        validate_names(pn, &pp)?;

        self.pipelines.update(pn, pp.clone()).await?;

        // Reconcile each child set: update survivors, create newcomers,
        // delete leftovers. Not transactional across children.
        let mut existing: HashSet<String> = self
            .jobs
            .filter(pn)
            .await?
            .into_iter()
            .map(|j| j.name)
            .collect();
        for j in &pp.jobs {
            if existing.remove(&j.name) {
                self.jobs.update(pn, &j.name, j.clone()).await?;
            } else {
                self.jobs.create(pn, j.clone()).await?;
            }
        }
        for leftover in existing {
            self.jobs.delete(pn, &leftover).await?;
        }

        let mut existing: HashSet<String> = self
            .resource_types
            .filter(pn)
            .await?
            .into_iter()
            .map(|rt| rt.name)
            .collect();
        for rt in &pp.resource_types {
            if existing.remove(&rt.name) {
                self.resource_types.update(pn, &rt.name, rt.clone()).await?;
            } else {
                self.resource_types.create(pn, rt.clone()).await?;
            }
        }
        for leftover in existing {
            self.resource_types.delete(pn, &leftover).await?;
        }

        let mut existing: HashSet<String> = self
            .resources
            .filter(pn)
            .await?
            .into_iter()
            .map(|r| r.canonical)
            .collect();
        for r in &pp.resources {
            if existing.remove(&r.canonical) {
                self.resources
                    .update(pn, &r.type_name, &r.name, r.clone())
                    .await?;
            } else {
                self.resources.create(pn, r.clone()).await?;
            }
        }
        for leftover in existing {
            if let Some((rt, rn)) = leftover.split_once('.') {
                self.resources.delete(pn, rt, rn).await?;
            }
        }

        let mut existing: HashSet<String> = self
            .runners
            .filter(pn)
            .await?
            .into_iter()
            .map(|ru| ru.name)
            .collect();
        for ru in &pp.runners {
            if existing.remove(&ru.name) {
                self.runners.update(pn, &ru.name, ru.clone()).await?;
            } else {
                self.runners.create(pn, ru.clone()).await?;
            }
        }
        for leftover in existing {
            self.runners.delete(pn, &leftover).await?;
        }

        Ok(())
    }

    async fn get_pipeline(&self, pn: &str) -> Result<Pipeline> {
        if !is_valid_name(pn) {
            return Err(Error::InvalidInput(format!(
                "invalid pipeline name format {:?}",
                pn
            )));
        }
        let pp = self.pipelines.find(pn).await?;
        self.attach_children(pp).await
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut out = Vec::new();
        for pp in self.pipelines.filter().await? {
            out.push(self.attach_children(pp).await?);
        }
        Ok(out)
    }

    async fn delete_pipeline(&self, pn: &str) -> Result<()> {
        if !is_valid_name(pn) {
            return Err(Error::InvalidInput(format!(
                "invalid pipeline name format {:?}",
                pn
            )));
        }
        self.pipelines.delete(pn).await?;
        Ok(())
    }

    async fn trigger_pipeline_job(&self, pn: &str, jn: &str) -> Result<()> {
        if !is_valid_name(pn) || !is_valid_name(jn) {
            return Err(Error::InvalidInput(format!(
                "invalid name format {:?}/{:?}",
                pn, jn
            )));
        }
        self.jobs.find(pn, jn).await?;
        self.send(&Body::job(pn, jn)).await
    }

    async fn get_pipeline_job(&self, pn: &str, jn: &str) -> Result<Job> {
        Ok(self.jobs.find(pn, jn).await?)
    }

    async fn create_job_build(&self, pn: &str, jn: &str, b: Build) -> Result<u32> {
        Ok(self.builds.create(pn, jn, b).await?)
    }

    async fn update_job_build(&self, pn: &str, jn: &str, bid: u32, b: Build) -> Result<()> {
        Ok(self.builds.update(pn, jn, bid, b).await?)
    }

    async fn delete_job_build(&self, pn: &str, jn: &str, bid: u32) -> Result<()> {
        Ok(self.builds.delete(pn, jn, bid).await?)
    }

    async fn filter_job_builds(&self, pn: &str, jn: &str) -> Result<Vec<Build>> {
        Ok(self.builds.filter(pn, jn).await?)
    }

    async fn update_resource(&self, pn: &str, r: Resource) -> Result<()> {
        let (rt, rn) = (r.type_name.clone(), r.name.clone());
        Ok(self.resources.update(pn, &rt, &rn, r).await?)
    }

    async fn create_resource_version(
        &self,
        pn: &str,
        rt: &str,
        rn: &str,
        v: Version,
    ) -> Result<u32> {
        Ok(self.resources.create_version(pn, rt, rn, v).await?)
    }

    async fn filter_resource_versions(
        &self,
        pn: &str,
        rt: &str,
        rn: &str,
    ) -> Result<Vec<Version>> {
        Ok(self.resources.filter_versions(pn, rt, rn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qid_queue::{MemoryQueue, Subscription};
    use qid_store::MemoryStore;

    fn service() -> (Qid, MemoryStore, MemoryQueue) {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let qid = Qid::new(
            Arc::new(queue.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        );
        (qid, store, queue)
    }

    const RAW: &str = r#"
resource_type "git" {
  params = ["repository"]
  check "exec" { path = "scripts/check.sh" }
  pull  "exec" { path = "scripts/pull.sh" }
}

resource "git" "source" {
  repository = "https://example.com/qid.git"
}

job "test" {
  get "git" "source" { trigger = true }
  task "unit" "exec" {
    path = "make"
    args = "test"
  }
}

job "build" {
  get "git" "source" {
    passed  = ["test"]
    trigger = true
  }
  task "compile" "exec" { path = "make" }
}
"#;

    #[tokio::test]
    async fn test_create_rejects_invalid_name_without_writes() {
        let (qid, _, _) = service();
        let err = qid
            .create_pipeline("Bad Name", RAW, &VariableValues::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(qid.list_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_job_name_without_writes() {
        let (qid, _, _) = service();
        let raw = "job \"Bad_Job\" {}\n";
        let err = qid
            .create_pipeline("pp", raw, &VariableValues::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(qid.list_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_get_attaches_children() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        let pp = qid.get_pipeline("pp").await.unwrap();
        assert_eq!(pp.name, "pp");
        assert_eq!(pp.jobs.len(), 2);
        assert_eq!(pp.resources.len(), 1);
        assert_eq!(pp.resource_types.len(), 1);
        assert_eq!(pp.raw, RAW);
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();
        let err = qid
            .create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_reconciles_jobs() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", "job \"a\" {}\njob \"b\" {}\n", &VariableValues::new())
            .await
            .unwrap();

        qid.update_pipeline("pp", "job \"a\" {}\njob \"c\" {}\n", &VariableValues::new())
            .await
            .unwrap();

        let mut names: Vec<String> = qid
            .get_pipeline("pp")
            .await
            .unwrap()
            .jobs
            .into_iter()
            .map(|j| j.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_update_reconciles_resources_and_types() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        let raw = r#"
resource_type "file" {
  check "exec" { path = "scripts/stat.sh" }
}

resource "file" "drop" {
  path = "/srv/drop"
}
"#;
        qid.update_pipeline("pp", raw, &VariableValues::new())
            .await
            .unwrap();

        let pp = qid.get_pipeline("pp").await.unwrap();
        assert!(pp.jobs.is_empty());
        assert_eq!(pp.resources.len(), 1);
        assert_eq!(pp.resources[0].canonical, "file.drop");
        assert_eq!(pp.resource_types.len(), 1);
        assert_eq!(pp.resource_types[0].name, "file");
    }

    #[tokio::test]
    async fn test_update_preserves_resource_state() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        // Reconciliation updates the existing row in place; the id stays.
        let mut r = qid.get_pipeline("pp").await.unwrap().resources[0].clone();
        let id = r.id;
        r.logs = "boom".to_string();
        qid.update_resource("pp", r).await.unwrap();

        qid.update_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();
        let r = qid.get_pipeline("pp").await.unwrap().resources[0].clone();
        assert_eq!(r.id, id);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();
        qid.delete_pipeline("pp").await.unwrap();

        let err = qid.get_pipeline("pp").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_publishes_job_message() {
        let (qid, _, queue) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        qid.trigger_pipeline_job("pp", "build").await.unwrap();

        let m = queue.receive().await.unwrap();
        let body = Body::decode(m.body()).unwrap();
        m.ack();
        assert_eq!(body, Body::job("pp", "build"));
    }

    #[tokio::test]
    async fn test_trigger_unknown_job() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();
        let err = qid.trigger_pipeline_job("pp", "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_terminal_build_reads_back_unchanged() {
        let (qid, _, _) = service();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        let mut b = Build::started(chrono::Utc::now());
        let bid = qid.create_job_build("pp", "build", b.clone()).await.unwrap();
        b.status = qid_core::Status::Failed;
        b.duration = std::time::Duration::from_millis(20);
        qid.update_job_build("pp", "build", bid, b.clone())
            .await
            .unwrap();

        let builds = qid.filter_job_builds("pp", "build").await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].status, qid_core::Status::Failed);
        assert_eq!(builds[0].duration, std::time::Duration::from_millis(20));
    }
}
