//! Resource-check scheduler.
//!
//! A single long-lived loop inside the control plane that turns passage
//! of time into resource-check messages. It is the only scheduled
//! producer of such messages; ad-hoc triggers use the same shape. Errors
//! never stop the loop: one bad pipeline cannot stall the others.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use qid_core::builtin::CRON_RESOURCE_TYPE;
use qid_core::Body;
use qid_queue::Topic;
use qid_store::{PipelineRepo, ResourceRepo, ResourceTypeRepo};

/// Interval applied when a resource declares none.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Tick cadence of the scheduler loop.
const TICK: Duration = Duration::from_secs(1);

pub struct CheckScheduler {
    topic: Arc<dyn Topic>,
    pipelines: Arc<dyn PipelineRepo>,
    resources: Arc<dyn ResourceRepo>,
    resource_types: Arc<dyn ResourceTypeRepo>,
}

impl CheckScheduler {
    pub fn new(
        topic: Arc<dyn Topic>,
        pipelines: Arc<dyn PipelineRepo>,
        resources: Arc<dyn ResourceRepo>,
        resource_types: Arc<dyn ResourceTypeRepo>,
    ) -> CheckScheduler {
        CheckScheduler {
            topic,
            pipelines,
            resources,
            resource_types,
        }
    }

    /// Runs the scheduler loop until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("check scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every resource of every pipeline.
    async fn tick(&self) {
        let pipelines = match self.pipelines.filter().await {
            Ok(pipelines) => pipelines,
            Err(err) => {
                warn!(error = %err, "failed to list pipelines");
                return;
            }
        };

        for pp in pipelines {
            let resources = match self.resources.filter(&pp.name).await {
                Ok(resources) => resources,
                Err(err) => {
                    warn!(pipeline = %pp.name, error = %err, "failed to list resources");
                    continue;
                }
            };
            let types = match self.resource_types.filter(&pp.name).await {
                Ok(types) => types,
                Err(err) => {
                    warn!(pipeline = %pp.name, error = %err, "failed to list resource types");
                    continue;
                }
            };

            let now = Utc::now();
            for mut r in resources {
                let interval = match &r.check_interval {
                    Some(raw) => match humantime::parse_duration(raw) {
                        Ok(interval) => interval,
                        Err(err) => {
                            warn!(
                                pipeline = %pp.name,
                                resource = %r.canonical,
                                error = %err,
                                "invalid check interval"
                            );
                            continue;
                        }
                    },
                    None => DEFAULT_CHECK_INTERVAL,
                };

                if let Some(last) = r.last_check {
                    let elapsed = now.signed_duration_since(last);
                    let interval = chrono::Duration::from_std(interval)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    if elapsed < interval {
                        continue;
                    }
                }

                let declared = types.iter().any(|rt| rt.name == r.type_name);
                if !declared && r.type_name != CRON_RESOURCE_TYPE {
                    continue;
                }

                let body = Body::check(&pp.name, &r.canonical);
                let raw = match body.encode() {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!(resource = %r.canonical, error = %err, "failed to encode check");
                        continue;
                    }
                };
                if let Err(err) = self.topic.send(raw).await {
                    // Leave last_check untouched so the next tick retries.
                    warn!(resource = %r.canonical, error = %err, "failed to publish check");
                    continue;
                }
                debug!(pipeline = %pp.name, resource = %r.canonical, "published resource check");

                r.last_check = Some(now);
                let (rt, rn) = (r.type_name.clone(), r.name.clone());
                if let Err(err) = self.resources.update(&pp.name, &rt, &rn, r).await {
                    warn!(pipeline = %pp.name, error = %err, "failed to persist last check");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Qid;
    use qid_core::service::VariableValues;
    use qid_core::Service;
    use qid_queue::{MemoryQueue, Subscription};
    use qid_store::MemoryStore;

    fn fixture() -> (Qid, MemoryStore, MemoryQueue) {
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
  check "exec" { path = "scripts/check.sh" }
}

resource "git" "source" {
  check_interval = "1m"
}
"#;

    fn scheduler(store: &MemoryStore, queue: &MemoryQueue) -> CheckScheduler {
        CheckScheduler::new(
            Arc::new(queue.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn test_due_resource_gets_exactly_one_check() {
        let (qid, store, queue) = fixture();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        let s = scheduler(&store, &queue);
        s.tick().await;

        let m = queue.receive().await.unwrap();
        let body = Body::decode(m.body()).unwrap();
        m.ack();
        assert_eq!(body, Body::check("pp", "git.source"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_interval_not_elapsed_skips() {
        let (qid, store, queue) = fixture();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        // Checked 30s ago with a 1m interval: not due.
        let mut r = qid.get_pipeline("pp").await.unwrap().resources[0].clone();
        r.last_check = Some(Utc::now() - chrono::Duration::seconds(30));
        qid.update_resource("pp", r).await.unwrap();

        let s = scheduler(&store, &queue);
        s.tick().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_interval_elapsed_fires_and_advances_last_check() {
        let (qid, store, queue) = fixture();
        qid.create_pipeline("pp", RAW, &VariableValues::new())
            .await
            .unwrap();

        let mut r = qid.get_pipeline("pp").await.unwrap().resources[0].clone();
        let stale = Utc::now() - chrono::Duration::seconds(61);
        r.last_check = Some(stale);
        qid.update_resource("pp", r).await.unwrap();

        let s = scheduler(&store, &queue);
        s.tick().await;

        let m = queue.receive().await.unwrap();
        m.ack();
        let r = qid.get_pipeline("pp").await.unwrap().resources[0].clone();
        assert!(r.last_check.unwrap() > stale);

        // Immediately after firing the resource is no longer due.
        s.tick().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_type_is_skipped_unless_builtin() {
        let raw = r#"
resource "ghost" "one" {}
resource "cron" "tick" { check_interval = "1s" }
"#;
        let (qid, store, queue) = fixture();
        qid.create_pipeline("pp", raw, &VariableValues::new())
            .await
            .unwrap();

        let s = scheduler(&store, &queue);
        s.tick().await;

        // Only the cron resource fires; "ghost" has no resource type.
        let m = queue.receive().await.unwrap();
        let body = Body::decode(m.body()).unwrap();
        m.ack();
        assert_eq!(body.resource_canonical.as_deref(), Some("cron.tick"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_, store, queue) = fixture();
        let s = scheduler(&store, &queue);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(s.run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
