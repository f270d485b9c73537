//! End-to-end worker tests against the in-memory store and queue.

use std::sync::Arc;

use qid_core::service::VariableValues;
use qid_core::{Body, Service, Status};
use qid_queue::{MemoryQueue, Subscription, Topic};
use qid_service::Qid;
use qid_store::MemoryStore;
use qid_worker::Worker;

struct Fixture {
    svc: Arc<Qid>,
    queue: MemoryQueue,
    worker: Worker,
    _workdir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new();
    let svc = Arc::new(Qid::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let workdir = tempfile::tempdir().unwrap();
    let worker = Worker::new(
        svc.clone(),
        Arc::new(queue.clone()),
        Arc::new(queue.clone()),
    )
    .with_workdir_base(workdir.path());
    Fixture {
        svc,
        queue,
        worker,
        _workdir: workdir,
    }
}

impl Fixture {
    async fn create(&self, raw: &str) {
        self.svc
            .create_pipeline("pp", raw, &VariableValues::new())
            .await
            .unwrap();
    }

    async fn send(&self, body: Body) {
        self.queue.send(body.encode().unwrap()).await.unwrap();
    }

    /// Processes exactly one queued message.
    async fn step(&self) {
        let message = self.queue.receive().await.unwrap();
        self.worker.process(message).await;
    }

    /// Processes queued messages (including fan-out) until none remain.
    async fn drain(&self) {
        while !self.queue.is_empty() {
            self.step().await;
        }
    }

    async fn seed_version(&self, payload: serde_json::Value) -> u32 {
        let payload = payload.as_object().unwrap().clone();
        self.svc
            .create_resource_version("pp", "git", "source", qid_core::Version { id: 0, payload })
            .await
            .unwrap()
    }
}

const GIT_PIPELINE: &str = r#"
resource_type "git" {
  check "exec" {
    path = "echo"
    args = "'[{\"sha\":\"x\"},{\"sha\":\"y\"}]'"
  }
  pull "exec" { path = "true" }
}

resource "git" "source" {}

job "build" {
  get "git" "source" { trigger = true }
  task "compile" "exec" { path = "true" }
}

job "deploy" {
  get "git" "source" {
    passed  = ["build"]
    trigger = true
  }
  task "ship" "exec" { path = "true" }
}
"#;

#[tokio::test]
async fn test_job_run_records_steps_and_fans_out() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;
    let vid = f.seed_version(serde_json::json!({"sha": "abc"})).await;

    f.send(Body::job("pp", "build")).await;
    f.step().await;

    let builds = f.svc.filter_job_builds("pp", "build").await.unwrap();
    assert_eq!(builds.len(), 1);
    let b = &builds[0];
    assert_eq!(b.status, Status::Succeeded);
    assert_eq!(b.get.len(), 1);
    assert_eq!(b.get[0].name, "git.source");
    assert_eq!(b.get[0].version_id, Some(vid));
    assert_eq!(b.task.len(), 1);
    assert_eq!(b.task[0].name, "compile");
    assert!(b.duration > std::time::Duration::ZERO);

    // The successful task fanned out to the gated trigger job.
    let m = f.queue.receive().await.unwrap();
    let body = Body::decode(m.body()).unwrap();
    m.ack();
    assert_eq!(body.job_name.as_deref(), Some("deploy"));
    assert_eq!(body.resource_canonical.as_deref(), Some("git.source"));
    assert_eq!(body.version_id, 0);
}

#[tokio::test]
async fn test_downstream_job_runs_after_upstream_success() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;
    f.seed_version(serde_json::json!({"sha": "abc"})).await;

    f.send(Body::job("pp", "build")).await;
    f.drain().await;

    let deploys = f.svc.filter_job_builds("pp", "deploy").await.unwrap();
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].status, Status::Succeeded);
}

#[tokio::test]
async fn test_passed_gate_skips_without_upstream_build() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;
    f.seed_version(serde_json::json!({"sha": "abc"})).await;

    // No build of "build" exists yet: deploy is silently skipped.
    f.send(Body::job("pp", "deploy")).await;
    f.step().await;

    assert!(f
        .svc
        .filter_job_builds("pp", "deploy")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_passed_gate_skips_when_latest_upstream_failed() {
    let failing = r#"
resource_type "git" {
  check "exec" { path = "true" }
  pull "exec" { path = "true" }
}

resource "git" "source" {}

job "build" {
  get "git" "source" {}
  task "compile" "exec" { path = "false" }
}

job "deploy" {
  get "git" "source" { passed = ["build"] }
  task "ship" "exec" { path = "true" }
}
"#;
    let f = fixture();
    f.create(failing).await;
    f.seed_version(serde_json::json!({"sha": "abc"})).await;

    f.send(Body::job("pp", "build")).await;
    f.step().await;
    assert_eq!(
        f.svc.filter_job_builds("pp", "build").await.unwrap()[0].status,
        Status::Failed
    );

    f.send(Body::job("pp", "deploy")).await;
    f.step().await;
    assert!(f
        .svc
        .filter_job_builds("pp", "deploy")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_task_runs_hooks_and_stops_fan_out() {
    let raw = r#"
resource_type "git" {
  check "exec" { path = "true" }
  pull "exec" { path = "true" }
}

resource "git" "source" {}

job "build" {
  get "git" "source" {}
  task "t1" "exec" {
    path = "false"
    on_failure "exec" {
      path = "echo"
      args = "cleaning up"
    }
  }
  ensure "exec" {
    path = "echo"
    args = "always"
  }
}

job "deploy" {
  get "git" "source" {
    passed  = ["build"]
    trigger = true
  }
  task "ship" "exec" { path = "true" }
}
"#;
    let f = fixture();
    f.create(raw).await;
    f.seed_version(serde_json::json!({"sha": "abc"})).await;

    f.send(Body::job("pp", "build")).await;
    f.step().await;

    let builds = f.svc.filter_job_builds("pp", "build").await.unwrap();
    assert_eq!(builds.len(), 1);
    let b = &builds[0];
    assert_eq!(b.status, Status::Failed);

    let task_names: Vec<&str> = b.task.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(task_names, vec!["t1", "t1:on_failure"]);
    assert!(b.task[0].logs.contains("exited with"));
    assert!(b.task[1].logs.contains("cleaning up"));

    let job_names: Vec<&str> = b.job.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(job_names, vec!["ensure"]);

    // No downstream message for a failed build.
    assert!(f.queue.is_empty());
}

#[tokio::test]
async fn test_multiple_hooks_are_index_disambiguated() {
    let raw = r#"
job "build" {
  task "t1" "exec" {
    path = "false"
    on_failure "exec" {
      path = "echo"
      args = "first"
    }
    on_failure "exec" {
      path = "echo"
      args = "second"
    }
  }
}
"#;
    let f = fixture();
    f.create(raw).await;

    f.send(Body::job("pp", "build")).await;
    f.step().await;

    let b = f.svc.filter_job_builds("pp", "build").await.unwrap()[0].clone();
    let task_names: Vec<&str> = b.task.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(task_names, vec!["t1", "t1:0:on_failure", "t1:1:on_failure"]);
}

#[tokio::test]
async fn test_check_appends_versions_and_triggers() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;

    f.send(Body::check("pp", "git.source")).await;
    f.step().await;

    let versions = f
        .svc
        .filter_resource_versions("pp", "git", "source")
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].id < versions[1].id);
    assert_eq!(versions[0].payload["sha"], "x");
    assert_eq!(versions[1].payload["sha"], "y");

    // One trigger per new version for the gate-free trigger get; the
    // deploy job is gated by `passed` and stays quiet.
    let mut triggered = Vec::new();
    while !f.queue.is_empty() {
        let m = f.queue.receive().await.unwrap();
        let body = Body::decode(m.body()).unwrap();
        m.ack();
        triggered.push((body.job_name.unwrap(), body.version_id));
    }
    assert_eq!(
        triggered,
        vec![
            ("build".to_string(), versions[0].id),
            ("build".to_string(), versions[1].id)
        ]
    );
}

#[tokio::test]
async fn test_check_failure_surfaces_in_resource_logs() {
    let raw = r#"
resource_type "git" {
  check "exec" { path = "false" }
  pull "exec" { path = "true" }
}

resource "git" "source" {}
"#;
    let f = fixture();
    f.create(raw).await;

    f.send(Body::check("pp", "git.source")).await;
    f.step().await;

    let r = f.svc.get_pipeline("pp").await.unwrap().resources[0].clone();
    assert!(r.logs.contains("exited with"));
    assert!(f
        .svc
        .filter_resource_versions("pp", "git", "source")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_check_success_clears_stale_logs() {
    let raw = r#"
resource_type "git" {
  check "exec" { path = "echo" }
  pull "exec" { path = "true" }
}

resource "git" "source" {}
"#;
    let f = fixture();
    f.create(raw).await;

    let mut r = f.svc.get_pipeline("pp").await.unwrap().resources[0].clone();
    r.logs = "old failure".to_string();
    f.svc.update_resource("pp", r).await.unwrap();

    f.send(Body::check("pp", "git.source")).await;
    f.step().await;

    let r = f.svc.get_pipeline("pp").await.unwrap().resources[0].clone();
    assert!(r.logs.is_empty());
}

#[tokio::test]
async fn test_check_invalid_json_line_recorded() {
    let raw = r#"
resource_type "git" {
  check "exec" {
    path = "echo"
    args = "not-json"
  }
  pull "exec" { path = "true" }
}

resource "git" "source" {}
"#;
    let f = fixture();
    f.create(raw).await;

    f.send(Body::check("pp", "git.source")).await;
    f.step().await;

    let r = f.svc.get_pipeline("pp").await.unwrap().resources[0].clone();
    assert!(r.logs.contains("failed to parse versions line"));
}

#[tokio::test]
async fn test_message_version_binds_specific_version() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;
    let first = f.seed_version(serde_json::json!({"sha": "one"})).await;
    f.seed_version(serde_json::json!({"sha": "two"})).await;

    let mut body = Body::job("pp", "build");
    body.resource_canonical = Some("git.source".to_string());
    body.version_id = first;
    f.send(body).await;
    f.step().await;

    let b = f.svc.filter_job_builds("pp", "build").await.unwrap()[0].clone();
    assert_eq!(b.get[0].version_id, Some(first));
}

#[tokio::test]
async fn test_missing_version_fails_build() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;
    f.seed_version(serde_json::json!({"sha": "one"})).await;

    let mut body = Body::job("pp", "build");
    body.version_id = 99;
    f.send(body).await;
    f.step().await;

    let b = f.svc.filter_job_builds("pp", "build").await.unwrap()[0].clone();
    assert_eq!(b.status, Status::Failed);
    assert!(b.error.as_deref().unwrap_or_default().contains("not found"));
}

#[tokio::test]
async fn test_get_without_versions_fails_build() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;

    f.send(Body::job("pp", "build")).await;
    f.step().await;

    let b = f.svc.filter_job_builds("pp", "build").await.unwrap()[0].clone();
    assert_eq!(b.status, Status::Failed);
    assert!(b
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no versions"));
}

#[tokio::test]
async fn test_builtin_cron_checks_and_triggers() {
    let raw = r#"
resource "cron" "tick" { check_interval = "1s" }

job "nightly" {
  get "cron" "tick" { trigger = true }
  task "report" "exec" { path = "true" }
}
"#;
    let f = fixture();
    f.create(raw).await;

    f.send(Body::check("pp", "cron.tick")).await;
    f.drain().await;

    let versions = f
        .svc
        .filter_resource_versions("pp", "cron", "tick")
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert!(versions[0].payload.contains_key("timestamp"));

    let builds = f.svc.filter_job_builds("pp", "nightly").await.unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, Status::Succeeded);
    assert_eq!(builds[0].get[0].version_id, Some(versions[0].id));
}

#[tokio::test]
async fn test_noop_message_is_acknowledged() {
    let f = fixture();
    f.create(GIT_PIPELINE).await;

    f.send(Body {
        pipeline_name: "pp".to_string(),
        job_name: None,
        resource_canonical: None,
        version_id: 0,
    })
    .await;
    f.step().await;

    assert!(f.queue.is_empty());
    assert!(f
        .svc
        .filter_job_builds("pp", "build")
        .await
        .unwrap()
        .is_empty());
}
