//! End-to-end tests: the HTTP client against a served router.

use std::sync::Arc;

use qid_api::{routes, AppState, Client, QueueBridge};
use qid_core::service::VariableValues;
use qid_core::{Body, Build, Error, Service, Status};
use qid_queue::{MemoryQueue, Subscription};
use qid_service::Qid;
use qid_store::MemoryStore;

const RAW: &str = r#"
resource_type "git" {
  check "exec" { path = "scripts/check.sh" }
  pull  "exec" { path = "scripts/pull.sh" }
}

resource "git" "source" {}

job "build" {
  get "git" "source" { trigger = true }
  task "compile" "exec" { path = "make" }
}
"#;

async fn spawn_server() -> Client {
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
    let bridge = Arc::new(QueueBridge::new(
        Arc::new(queue.clone()),
        Arc::new(queue.clone()),
    ));
    let app = routes::router(AppState::new(svc, bridge));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Client::new(format!("http://{}", addr))
}

#[tokio::test]
async fn test_pipeline_round_trip() {
    let client = spawn_server().await;

    client
        .create_pipeline("pp", RAW, &VariableValues::new())
        .await
        .unwrap();

    let pipelines = client.list_pipelines().await.unwrap();
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].name, "pp");

    let pp = client.get_pipeline("pp").await.unwrap();
    assert_eq!(pp.jobs.len(), 1);
    assert_eq!(pp.resources[0].canonical, "git.source");

    let job = client.get_pipeline_job("pp", "build").await.unwrap();
    assert_eq!(job.tasks[0].name, "compile");

    client.delete_pipeline("pp").await.unwrap();
    let err = client.get_pipeline("pp").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_error_mapping() {
    let client = spawn_server().await;

    let err = client
        .create_pipeline("Bad Name", RAW, &VariableValues::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    client
        .create_pipeline("pp", RAW, &VariableValues::new())
        .await
        .unwrap();
    let err = client
        .create_pipeline("pp", RAW, &VariableValues::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_trigger_flows_through_queue_bridge() {
    let client = spawn_server().await;
    client
        .create_pipeline("pp", RAW, &VariableValues::new())
        .await
        .unwrap();

    client.trigger_pipeline_job("pp", "build").await.unwrap();

    // The client is also the worker-side subscription.
    let message = client.receive().await.unwrap();
    let body = Body::decode(message.body()).unwrap();
    message.ack();
    assert_eq!(body, Body::job("pp", "build"));
}

#[tokio::test]
async fn test_build_facade_over_http() {
    let client = spawn_server().await;
    client
        .create_pipeline("pp", RAW, &VariableValues::new())
        .await
        .unwrap();

    let build = Build::started(chrono::Utc::now());
    let bid = client.create_job_build("pp", "build", build.clone()).await.unwrap();
    assert_eq!(bid, 1);

    let mut done = build;
    done.status = Status::Succeeded;
    done.duration = std::time::Duration::from_millis(5);
    client
        .update_job_build("pp", "build", bid, done)
        .await
        .unwrap();

    let builds = client.filter_job_builds("pp", "build").await.unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, Status::Succeeded);

    let vid = client
        .create_resource_version("pp", "git", "source", qid_core::Version::default())
        .await
        .unwrap();
    assert_eq!(vid, 1);
    let versions = client
        .filter_resource_versions("pp", "git", "source")
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
}
