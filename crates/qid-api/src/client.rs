//! HTTP client for the QID API.
//!
//! Implements the [`Service`] trait plus the queue [`Topic`] and
//! [`Subscription`] contracts against a remote control plane, so a
//! worker process needs nothing but the server URL.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::routes::MESSAGE_ID_HEADER;
use qid_core::service::VariableValues;
use qid_core::{Build, Error, Job, Pipeline, Resource, Result, Service, Version};
use qid_queue::{Acker, Message, QueueError, QueueResult, Subscription, Topic};

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u32,
}

impl Client {
    pub fn new(base: impl Into<String>) -> Client {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Client {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn ok(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::BAD_REQUEST => Error::InvalidInput(message),
            StatusCode::NOT_FOUND => Error::NotFound(message),
            StatusCode::CONFLICT => Error::Conflict(message),
            StatusCode::UNPROCESSABLE_ENTITY => Error::InvalidState(message),
            _ => Error::Transport(message),
        })
    }
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}

#[async_trait]
impl Service for Client {
    async fn create_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/pipelines/{}", pn)))
            .json(&json!({ "config": raw, "variables": vars }))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn update_pipeline(&self, pn: &str, raw: &str, vars: &VariableValues) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("/pipelines/{}", pn)))
            .json(&json!({ "config": raw, "variables": vars }))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn get_pipeline(&self, pn: &str) -> Result<Pipeline> {
        let response = self
            .http
            .get(self.url(&format!("/pipelines/{}", pn)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await?.json().await.map_err(transport)
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let response = self
            .http
            .get(self.url("/pipelines"))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await?.json().await.map_err(transport)
    }

    async fn delete_pipeline(&self, pn: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/pipelines/{}", pn)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn trigger_pipeline_job(&self, pn: &str, jn: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/pipelines/{}/jobs/{}/trigger", pn, jn)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn get_pipeline_job(&self, pn: &str, jn: &str) -> Result<Job> {
        let response = self
            .http
            .get(self.url(&format!("/pipelines/{}/jobs/{}", pn, jn)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await?.json().await.map_err(transport)
    }

    async fn create_job_build(&self, pn: &str, jn: &str, b: Build) -> Result<u32> {
        let response = self
            .http
            .post(self.url(&format!("/pipelines/{}/jobs/{}/builds", pn, jn)))
            .json(&b)
            .send()
            .await
            .map_err(transport)?;
        let id: IdResponse = self.ok(response).await?.json().await.map_err(transport)?;
        Ok(id.id)
    }

    async fn update_job_build(&self, pn: &str, jn: &str, bid: u32, b: Build) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("/pipelines/{}/jobs/{}/builds/{}", pn, jn, bid)))
            .json(&b)
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn delete_job_build(&self, pn: &str, jn: &str, bid: u32) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/pipelines/{}/jobs/{}/builds/{}", pn, jn, bid)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn filter_job_builds(&self, pn: &str, jn: &str) -> Result<Vec<Build>> {
        let response = self
            .http
            .get(self.url(&format!("/pipelines/{}/jobs/{}/builds", pn, jn)))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await?.json().await.map_err(transport)
    }

    async fn update_resource(&self, pn: &str, r: Resource) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!(
                "/pipelines/{}/resources/{}/{}",
                pn, r.type_name, r.name
            )))
            .json(&r)
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await.map(|_| ())
    }

    async fn create_resource_version(
        &self,
        pn: &str,
        rt: &str,
        rn: &str,
        v: Version,
    ) -> Result<u32> {
        let response = self
            .http
            .post(self.url(&format!(
                "/pipelines/{}/resources/{}/{}/versions",
                pn, rt, rn
            )))
            .json(&v)
            .send()
            .await
            .map_err(transport)?;
        let id: IdResponse = self.ok(response).await?.json().await.map_err(transport)?;
        Ok(id.id)
    }

    async fn filter_resource_versions(
        &self,
        pn: &str,
        rt: &str,
        rn: &str,
    ) -> Result<Vec<Version>> {
        let response = self
            .http
            .get(self.url(&format!(
                "/pipelines/{}/resources/{}/{}/versions",
                pn, rt, rn
            )))
            .send()
            .await
            .map_err(transport)?;
        self.ok(response).await?.json().await.map_err(transport)
    }
}

#[async_trait]
impl Topic for Client {
    async fn send(&self, body: Vec<u8>) -> QueueResult<()> {
        let response = self
            .http
            .post(self.url("/queue/push"))
            .body(body)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(QueueError::Transport(format!(
                "push failed with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for Client {
    async fn receive(&self) -> QueueResult<Message> {
        loop {
            let response = self
                .http
                .post(self.url("/queue/pop"))
                .send()
                .await
                .map_err(|err| QueueError::Transport(err.to_string()))?;
            match response.status() {
                StatusCode::OK => {
                    let id = response
                        .headers()
                        .get(MESSAGE_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from)
                        .ok_or_else(|| {
                            QueueError::Transport("pop response without message id".to_string())
                        })?;
                    let body = response
                        .bytes()
                        .await
                        .map_err(|err| QueueError::Transport(err.to_string()))?;
                    let acker = HttpAcker {
                        http: self.http.clone(),
                        url: self.url(&format!("/queue/{}/ack", id)),
                    };
                    return Ok(Message::new(body.to_vec(), Box::new(acker)));
                }
                // Empty long-poll: ask again.
                StatusCode::NO_CONTENT => continue,
                status => {
                    return Err(QueueError::Transport(format!(
                        "pop failed with {}",
                        status
                    )));
                }
            }
        }
    }
}

/// Acks over HTTP, fire and forget. A lost ack only means the lease
/// expires and the message is processed again, which workers tolerate.
struct HttpAcker {
    http: reqwest::Client,
    url: String,
}

impl Acker for HttpAcker {
    fn ack(self: Box<Self>) {
        let HttpAcker { http, url } = *self;
        tokio::spawn(async move {
            if let Err(err) = http.post(&url).send().await {
                warn!(error = %err, "failed to ack message");
            }
        });
    }

    // Leaving the lease to expire redelivers the message.
    fn nack(self: Box<Self>) {}
}
