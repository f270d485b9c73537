//! Route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::ApiError;
use crate::AppState;
use qid_core::service::VariableValues;
use qid_core::{Build, Job, Pipeline, Resource, Version};

/// Header carrying the lease id of a popped queue message.
pub const MESSAGE_ID_HEADER: &str = "x-qid-message-id";

/// How long `/queue/pop` waits for a message before returning empty.
const POP_WAIT: Duration = Duration::from_secs(25);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipelines", get(list_pipelines))
        .route(
            "/pipelines/{name}",
            post(create_pipeline)
                .put(update_pipeline)
                .get(get_pipeline)
                .delete(delete_pipeline),
        )
        .route("/pipelines/{name}/jobs/{job}", get(get_job))
        .route("/pipelines/{name}/jobs/{job}/trigger", post(trigger_job))
        .route(
            "/pipelines/{name}/jobs/{job}/builds",
            get(list_builds).post(create_build),
        )
        .route(
            "/pipelines/{name}/jobs/{job}/builds/{id}",
            axum::routing::put(update_build).delete(delete_build),
        )
        .route(
            "/pipelines/{name}/resources/{type}/{resource}",
            axum::routing::put(update_resource),
        )
        .route(
            "/pipelines/{name}/resources/{type}/{resource}/versions",
            get(list_versions).post(create_version),
        )
        .route("/queue/push", post(queue_push))
        .route("/queue/pop", post(queue_pop))
        .route("/queue/{id}/ack", post(queue_ack))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PipelineRequest {
    config: String,
    #[serde(default)]
    variables: VariableValues,
}

async fn create_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PipelineRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .svc
        .create_pipeline(&name, &req.config, &req.variables)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn update_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PipelineRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .svc
        .update_pipeline(&name, &req.config, &req.variables)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_pipelines(
    State(state): State<AppState>,
) -> Result<Json<Vec<Pipeline>>, ApiError> {
    Ok(Json(state.svc.list_pipelines().await?))
}

async fn get_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Pipeline>, ApiError> {
    Ok(Json(state.svc.get_pipeline(&name).await?))
}

async fn delete_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.svc.delete_pipeline(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_job(
    State(state): State<AppState>,
    Path((name, job)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.svc.get_pipeline_job(&name, &job).await?))
}

async fn trigger_job(
    State(state): State<AppState>,
    Path((name, job)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.svc.trigger_pipeline_job(&name, &job).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_builds(
    State(state): State<AppState>,
    Path((name, job)): Path<(String, String)>,
) -> Result<Json<Vec<Build>>, ApiError> {
    Ok(Json(state.svc.filter_job_builds(&name, &job).await?))
}

async fn create_build(
    State(state): State<AppState>,
    Path((name, job)): Path<(String, String)>,
    Json(build): Json<Build>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.svc.create_job_build(&name, &job, build).await?;
    Ok(Json(json!({ "id": id })))
}

async fn update_build(
    State(state): State<AppState>,
    Path((name, job, id)): Path<(String, String, u32)>,
    Json(build): Json<Build>,
) -> Result<StatusCode, ApiError> {
    state.svc.update_job_build(&name, &job, id, build).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_build(
    State(state): State<AppState>,
    Path((name, job, id)): Path<(String, String, u32)>,
) -> Result<StatusCode, ApiError> {
    state.svc.delete_job_build(&name, &job, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_resource(
    State(state): State<AppState>,
    Path((name, _rt, _rn)): Path<(String, String, String)>,
    Json(resource): Json<Resource>,
) -> Result<StatusCode, ApiError> {
    state.svc.update_resource(&name, resource).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_versions(
    State(state): State<AppState>,
    Path((name, rt, rn)): Path<(String, String, String)>,
) -> Result<Json<Vec<Version>>, ApiError> {
    Ok(Json(state.svc.filter_resource_versions(&name, &rt, &rn).await?))
}

async fn create_version(
    State(state): State<AppState>,
    Path((name, rt, rn)): Path<(String, String, String)>,
    Json(version): Json<Version>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state
        .svc
        .create_resource_version(&name, &rt, &rn, version)
        .await?;
    Ok(Json(json!({ "id": id })))
}

async fn queue_push(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    state
        .queue
        .push(body.to_vec())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn queue_pop(State(state): State<AppState>) -> Response {
    match state.queue.pop(POP_WAIT).await {
        Some((id, body)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = id.to_string().parse() {
                headers.insert(MESSAGE_ID_HEADER, value);
            }
            (StatusCode::OK, headers, body).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn queue_ack(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<StatusCode, ApiError> {
    state.queue.ack(id);
    Ok(StatusCode::NO_CONTENT)
}
