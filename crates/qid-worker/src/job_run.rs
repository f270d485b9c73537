//! Job-run state machine.
//!
//! One build walks created → started → succeeded | failed. The get phase
//! pulls every input resource, the task phase runs the commands, and
//! every step failure diverts into the failure tail. Hooks append extra
//! steps next to the step that owns them; job-level hooks land in the
//! build's `job` list.

use chrono::Utc;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::executor::{self, RunOutcome};
use crate::params::command_params;
use qid_core::builtin;
use qid_core::{
    Body, Build, Error, GetStep, Job, Pipeline, Result, RunnerCommand, Service, Status, Step,
    TaskStep,
};
use qid_queue::Topic;

/// Which build list a step is recorded into.
#[derive(Clone, Copy)]
enum Phase {
    Get,
    Task,
    Job,
}

pub(crate) async fn run_job(
    svc: &dyn Service,
    topic: &dyn Topic,
    pp: &Pipeline,
    body: &Body,
    workdir: &Path,
) -> Result<()> {
    let jn = body.job_name.as_deref().unwrap_or_default();
    let job = pp
        .job(jn)
        .ok_or_else(|| Error::NotFound(format!("job {:?} in pipeline {:?}", jn, pp.name)))?;

    let build = Build::started(Utc::now());
    let bid = svc.create_job_build(&pp.name, jn, build.clone()).await?;
    let mut run = BuildRun {
        svc,
        topic,
        pp,
        job,
        body,
        workdir,
        build,
        started: Instant::now(),
    };
    run.build.id = bid;

    match run.execute().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Infrastructure failure: best-effort mark the build failed
            // before abandoning the message.
            run.build.status = Status::Failed;
            run.build.error = Some(err.to_string());
            run.build.duration = run.started.elapsed();
            if let Err(persist_err) = run.persist().await {
                warn!(error = %persist_err, "failed to mark build failed");
            }
            Err(err)
        }
    }
}

struct BuildRun<'a> {
    svc: &'a dyn Service,
    topic: &'a dyn Topic,
    pp: &'a Pipeline,
    job: &'a Job,
    body: &'a Body,
    workdir: &'a Path,
    build: Build,
    started: Instant,
}

impl BuildRun<'_> {
    async fn execute(&mut self) -> Result<()> {
        let (pn, jn) = (self.pp.name.clone(), self.job.name.clone());

        if !self.passed_gate_open().await? {
            debug!(pipeline = %pn, job = %jn, build = self.build.id, "passed gate closed, skipping");
            self.svc.delete_job_build(&pn, &jn, self.build.id).await?;
            return Ok(());
        }

        info!(pipeline = %pn, job = %jn, build = self.build.id, "build started");

        for get in self.job.gets.clone() {
            if !self.run_get(&get).await? {
                return self.failure_tail().await;
            }
        }

        for task in self.job.tasks.clone() {
            if !self.run_task(&task).await? {
                return self.failure_tail().await;
            }
            self.fan_out().await?;
        }

        self.build.status = Status::Succeeded;
        self.build.duration = self.started.elapsed();
        self.persist().await?;
        info!(pipeline = %pn, job = %jn, build = self.build.id, "build succeeded");

        let hooks = self.job.on_success.clone();
        self.run_hooks(&hooks, None, "on_success", Phase::Job).await;
        self.ensure_tail().await
    }

    /// True when every `passed` gate of every get step is satisfied: the
    /// gating job exists and its latest build succeeded.
    async fn passed_gate_open(&self) -> Result<bool> {
        for get in &self.job.gets {
            for gating in &get.passed {
                let builds = self.svc.filter_job_builds(&self.pp.name, gating).await?;
                match builds.last() {
                    Some(latest) if latest.status == Status::Succeeded => {}
                    _ => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Runs one get step. Returns false when the build failed.
    async fn run_get(&mut self, get: &GetStep) -> Result<bool> {
        let name = get.resource_canonical();
        let Some(resource) = self.pp.resource(&get.type_name, &get.name).cloned() else {
            debug!(step = %name, "get step resource not declared, skipping");
            return Ok(true);
        };
        let Some(rt) = builtin::resource_type(self.pp, &get.type_name) else {
            debug!(step = %name, "get step resource type missing, skipping");
            return Ok(true);
        };

        let versions = self
            .svc
            .filter_resource_versions(&self.pp.name, &get.type_name, &get.name)
            .await?;
        let version = if self.body.version_id != 0 {
            match versions.iter().find(|v| v.id == self.body.version_id) {
                Some(v) => v.clone(),
                None => {
                    return Err(Error::InvalidState(format!(
                        "version {} of resource {:?} not found",
                        self.body.version_id, name
                    )));
                }
            }
        } else {
            match versions.last() {
                Some(v) => v.clone(),
                None => {
                    return Err(Error::InvalidState(format!(
                        "resource {:?} has no versions",
                        name
                    )));
                }
            }
        };

        let outcome = if builtin::is_builtin_cron(self.pp, &rt) {
            // The built-in cron pull has nothing to fetch.
            RunOutcome::default()
        } else {
            let params = command_params(&rt.pull.params, Some(&version), &rt, &resource);
            let Some(runner) = executor::resolve_runner(self.pp, &rt.pull) else {
                return Err(Error::InvalidState(format!(
                    "unknown runner {:?} for pull of {:?}",
                    rt.pull.runner, name
                )));
            };
            executor::run(&runner, &params, self.workdir).await
        };

        let ok = outcome.success();
        self.build.get.push(Step {
            name: name.clone(),
            version_id: Some(version.id),
            logs: outcome.output,
            duration: outcome.duration,
        });
        if !ok {
            self.build.status = Status::Failed;
        }
        self.persist().await?;

        let hooks = if ok {
            get.on_success.clone()
        } else {
            get.on_failure.clone()
        };
        let suffix = if ok { "on_success" } else { "on_failure" };
        self.run_hooks(&hooks, Some(&name), suffix, Phase::Get).await;
        self.run_hooks(&get.ensure, Some(&name), "ensure", Phase::Get)
            .await;
        Ok(ok)
    }

    /// Runs one task step. Returns false when the build failed.
    async fn run_task(&mut self, task: &TaskStep) -> Result<bool> {
        let outcome = match executor::resolve_runner(self.pp, &task.command) {
            Some(runner) => executor::run(&runner, &task.command.params, self.workdir).await,
            None => {
                return Err(Error::InvalidState(format!(
                    "unknown runner {:?} for task {:?}",
                    task.command.runner, task.name
                )));
            }
        };

        let ok = outcome.success();
        self.build.task.push(Step {
            name: task.name.clone(),
            version_id: None,
            logs: outcome.output,
            duration: outcome.duration,
        });
        if !ok {
            self.build.status = Status::Failed;
        }
        self.persist().await?;

        let hooks = if ok {
            task.on_success.clone()
        } else {
            task.on_failure.clone()
        };
        let suffix = if ok { "on_success" } else { "on_failure" };
        self.run_hooks(&hooks, Some(&task.name), suffix, Phase::Task)
            .await;
        self.run_hooks(&task.ensure, Some(&task.name), "ensure", Phase::Task)
            .await;
        Ok(ok)
    }

    /// Enqueues every job gated on this one with `trigger` set. The
    /// incoming version id is forwarded verbatim; zero means "latest"
    /// downstream.
    async fn fan_out(&self) -> Result<()> {
        for nj in &self.pp.jobs {
            for get in &nj.gets {
                if !get.trigger || !get.passed.iter().any(|p| p == &self.job.name) {
                    continue;
                }
                let body = Body {
                    pipeline_name: self.pp.name.clone(),
                    job_name: Some(nj.name.clone()),
                    resource_canonical: Some(get.resource_canonical()),
                    version_id: self.body.version_id,
                };
                let raw = body
                    .encode()
                    .map_err(|err| Error::Transport(err.to_string()))?;
                self.topic
                    .send(raw)
                    .await
                    .map_err(|err| Error::Transport(err.to_string()))?;
                debug!(job = %nj.name, "triggered downstream job");
            }
        }
        Ok(())
    }

    /// Job-level failure hooks, then the shared ensure tail.
    async fn failure_tail(&mut self) -> Result<()> {
        self.build.duration = self.started.elapsed();
        self.persist().await?;
        info!(
            pipeline = %self.pp.name,
            job = %self.job.name,
            build = self.build.id,
            "build failed"
        );
        let hooks = self.job.on_failure.clone();
        self.run_hooks(&hooks, None, "on_failure", Phase::Job).await;
        self.ensure_tail().await
    }

    /// Job-level ensure hooks always run last.
    async fn ensure_tail(&mut self) -> Result<()> {
        let hooks = self.job.ensure.clone();
        self.run_hooks(&hooks, None, "ensure", Phase::Job).await;
        self.persist().await
    }

    /// Runs a hook list, appending one step per hook. Hook outcomes are
    /// recorded but never change the build status.
    async fn run_hooks(
        &mut self,
        hooks: &[RunnerCommand],
        prefix: Option<&str>,
        suffix: &str,
        phase: Phase,
    ) {
        for (i, hook) in hooks.iter().enumerate() {
            let name = hook_step_name(prefix, i, hooks.len(), suffix);
            let outcome = match executor::resolve_runner(self.pp, hook) {
                Some(runner) => executor::run(&runner, &hook.params, self.workdir).await,
                None => {
                    warn!(hook = %name, runner = %hook.runner, "unknown hook runner");
                    continue;
                }
            };
            let step = Step {
                name,
                version_id: None,
                logs: outcome.output,
                duration: outcome.duration,
            };
            match phase {
                Phase::Get => self.build.get.push(step),
                Phase::Task => self.build.task.push(step),
                Phase::Job => self.build.job.push(step),
            }
            if let Err(err) = self.persist().await {
                warn!(error = %err, "failed to persist hook step");
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        self.svc
            .update_job_build(&self.pp.name, &self.job.name, self.build.id, self.build.clone())
            .await
    }
}

/// Fixed hook naming: single hook gets the bare suffix, the k-th of n>1
/// gets `<k>:<suffix>` (zero-based); step-level hooks prepend the step
/// name.
fn hook_step_name(prefix: Option<&str>, index: usize, total: usize, suffix: &str) -> String {
    let base = if total > 1 {
        format!("{}:{}", index, suffix)
    } else {
        suffix.to_string()
    };
    match prefix {
        Some(step) => format!("{}:{}", step, base),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_step_name_single() {
        assert_eq!(hook_step_name(None, 0, 1, "ensure"), "ensure");
        assert_eq!(hook_step_name(Some("t1"), 0, 1, "on_failure"), "t1:on_failure");
    }

    #[test]
    fn test_hook_step_name_multiple() {
        assert_eq!(hook_step_name(None, 0, 2, "ensure"), "0:ensure");
        assert_eq!(hook_step_name(None, 1, 2, "ensure"), "1:ensure");
        assert_eq!(
            hook_step_name(Some("t1"), 1, 3, "on_success"),
            "t1:1:on_success"
        );
    }
}
