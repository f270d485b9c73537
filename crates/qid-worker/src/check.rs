//! Resource-check handler.
//!
//! Runs a resource type's check command, parses the last non-empty line
//! of its stdout as a JSON array of version objects, appends each as a
//! new resource version and enqueues the jobs that trigger on it.
//! Preceding output is treated as diagnostics and discarded.

use chrono::Utc;
use std::path::Path;
use tracing::{debug, warn};

use crate::executor;
use crate::params::command_params;
use qid_core::builtin::{self, CRON_TIMESTAMP_KEY};
use qid_core::{Body, Error, Pipeline, Resource, Result, Service, Version};
use qid_queue::Topic;

pub(crate) async fn check_resource(
    svc: &dyn Service,
    topic: &dyn Topic,
    pp: &Pipeline,
    canonical: &str,
    workdir: &Path,
) -> Result<()> {
    let Some(resource) = pp.resource_by_canonical(canonical).cloned() else {
        debug!(resource = %canonical, "resource not declared, dropping check");
        return Ok(());
    };
    let Some(rt) = builtin::resource_type(pp, &resource.type_name) else {
        debug!(resource = %canonical, "resource type missing, dropping check");
        return Ok(());
    };

    let payloads = if builtin::is_builtin_cron(pp, &rt) {
        // The built-in cron check ticks without spawning a process.
        let mut payload = serde_json::Map::new();
        payload.insert(
            CRON_TIMESTAMP_KEY.to_string(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        vec![payload]
    } else {
        let versions = svc
            .filter_resource_versions(&pp.name, &resource.type_name, &resource.name)
            .await?;
        let params = command_params(&rt.check.params, versions.last(), &rt, &resource);
        let Some(runner) = executor::resolve_runner(pp, &rt.check) else {
            warn!(resource = %canonical, runner = %rt.check.runner, "unknown check runner");
            return Ok(());
        };

        let outcome = executor::run(&runner, &params, workdir).await;
        if !outcome.success() {
            // Surface the failure on the resource for operators.
            let mut r = resource.clone();
            r.logs = outcome.output;
            svc.update_resource(&pp.name, r).await?;
            return Ok(());
        }
        if !resource.logs.is_empty() {
            let mut r = resource.clone();
            r.logs.clear();
            svc.update_resource(&pp.name, r).await?;
        }

        match parse_versions(&outcome.stdout) {
            Ok(payloads) => payloads,
            Err(message) => {
                let mut r = resource.clone();
                r.logs = message;
                svc.update_resource(&pp.name, r).await?;
                return Ok(());
            }
        }
    };

    for payload in payloads {
        let version = Version { id: 0, payload };
        let vid = svc
            .create_resource_version(&pp.name, &resource.type_name, &resource.name, version)
            .await?;
        debug!(resource = %canonical, version = vid, "new resource version");
        publish_triggers(topic, pp, &resource, vid).await?;
    }
    Ok(())
}

/// Parses the last non-empty stdout line as a JSON array of version
/// objects. No line or an empty array means no new versions.
fn parse_versions(
    stdout: &str,
) -> std::result::Result<Vec<serde_json::Map<String, serde_json::Value>>, String> {
    let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    serde_json::from_str(line.trim())
        .map_err(|err| format!("failed to parse versions line {:?}: {}", line.trim(), err))
}

/// One message per matching get step: the step pulls this resource, has
/// `trigger` set and carries no `passed` gate.
async fn publish_triggers(
    topic: &dyn Topic,
    pp: &Pipeline,
    resource: &Resource,
    version_id: u32,
) -> Result<()> {
    for job in &pp.jobs {
        for get in &job.gets {
            if get.type_name != resource.type_name
                || get.name != resource.name
                || !get.trigger
                || !get.passed.is_empty()
            {
                continue;
            }
            let body = Body {
                pipeline_name: pp.name.clone(),
                job_name: Some(job.name.clone()),
                resource_canonical: Some(resource.canonical.clone()),
                version_id,
            };
            let raw = body
                .encode()
                .map_err(|err| Error::Transport(err.to_string()))?;
            topic
                .send(raw)
                .await
                .map_err(|err| Error::Transport(err.to_string()))?;
            debug!(job = %job.name, version = version_id, "triggered job for new version");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions_last_non_empty_line() {
        let stdout = "checking remote...\nfound 2 refs\n\n[{\"sha\":\"x\"},{\"sha\":\"y\"}]\n\n";
        let versions = parse_versions(stdout).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0]["sha"], "x");
        assert_eq!(versions[1]["sha"], "y");
    }

    #[test]
    fn test_parse_versions_empty_output() {
        assert!(parse_versions("").unwrap().is_empty());
        assert!(parse_versions("\n\n").unwrap().is_empty());
        assert!(parse_versions("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_versions_invalid_line() {
        let err = parse_versions("diagnostics\nnot-json").unwrap_err();
        assert!(err.contains("failed to parse versions line"));
    }
}
