//! The worker receive loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{check, job_run};
use qid_core::{Body, Result, Service};
use qid_queue::{Message, Subscription, Topic};

/// A stateless worker. Any number of instances share one subscription
/// and compete for messages; each message gets its own working
/// directory, removed unconditionally when processing ends.
pub struct Worker {
    svc: Arc<dyn Service>,
    topic: Arc<dyn Topic>,
    subscription: Arc<dyn Subscription>,
    workdir_base: PathBuf,
}

impl Worker {
    pub fn new(
        svc: Arc<dyn Service>,
        topic: Arc<dyn Topic>,
        subscription: Arc<dyn Subscription>,
    ) -> Worker {
        Worker {
            svc,
            topic,
            subscription,
            workdir_base: std::env::temp_dir(),
        }
    }

    /// Puts per-message working directories under `base` instead of the
    /// system temp dir.
    pub fn with_workdir_base(mut self, base: impl Into<PathBuf>) -> Worker {
        self.workdir_base = base.into();
        self
    }

    /// Receives and processes messages until `shutdown` flips to true or
    /// the subscription terminally fails.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("worker stopping");
                        return;
                    }
                }
                received = self.subscription.receive() => match received {
                    Ok(message) => self.process(message).await,
                    Err(err) => {
                        error!(error = %err, "subscription failed, worker stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Handles one delivery end to end. The message is acknowledged and
    /// the working directory removed no matter how processing went.
    pub async fn process(&self, message: Message) {
        let body = match Body::decode(message.body()) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "undecodable message body");
                message.ack();
                return;
            }
        };

        let workdir = self.workdir_base.join(format!("qid-{}", Uuid::new_v4()));
        if let Err(err) = tokio::fs::create_dir_all(&workdir).await {
            error!(error = %err, "failed to create working directory");
            message.ack();
            return;
        }

        if let Err(err) = self.dispatch(&body, &workdir).await {
            error!(
                pipeline = %body.pipeline_name,
                job = body.job_name.as_deref().unwrap_or(""),
                resource = body.resource_canonical.as_deref().unwrap_or(""),
                error = %err,
                "failed to process message"
            );
        }

        if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
            warn!(error = %err, "failed to remove working directory");
        }
        message.ack();
    }

    async fn dispatch(&self, body: &Body, workdir: &Path) -> Result<()> {
        let pp = self.svc.get_pipeline(&body.pipeline_name).await?;
        match (&body.job_name, &body.resource_canonical) {
            (Some(_), _) => {
                job_run::run_job(
                    self.svc.as_ref(),
                    self.topic.as_ref(),
                    &pp,
                    body,
                    workdir,
                )
                .await
            }
            (None, Some(canonical)) => {
                check::check_resource(
                    self.svc.as_ref(),
                    self.topic.as_ref(),
                    &pp,
                    canonical,
                    workdir,
                )
                .await
            }
            (None, None) => Ok(()),
        }
    }
}
