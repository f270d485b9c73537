//! Runner executor.
//!
//! Expands a runner's path and args templates against a parameter map,
//! invokes the external command and returns its combined output together
//! with the wall-clock duration. A non-zero exit is reported through
//! [`RunOutcome::error`], never as a worker error.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;

use qid_core::runner::{Runner, RunnerCommand, EXEC_RUNNER};
use qid_core::Pipeline;

/// Name under which the working directory is exposed to templates and
/// the spawned process.
pub const WORKDIR_VAR: &str = "WORKDIR";

/// Result of one runner invocation.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Combined stdout and stderr; the error string is appended when the
    /// command failed.
    pub output: String,
    /// Stdout alone, for callers that parse command output.
    pub stdout: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(message: String) -> RunOutcome {
        RunOutcome {
            output: message.clone(),
            stdout: String::new(),
            duration: Duration::ZERO,
            error: Some(message),
        }
    }
}

/// Resolves a command's runner: pipeline-declared first, then the
/// built-in `exec`, which takes its templates from the parameter map.
pub fn resolve_runner(pp: &Pipeline, cmd: &RunnerCommand) -> Option<Runner> {
    if let Some(runner) = pp.runner(&cmd.runner) {
        return Some(runner.clone());
    }
    if cmd.runner == EXEC_RUNNER {
        return Some(Runner::exec(&cmd.params));
    }
    None
}

/// Runs a runner with the given parameters inside `cwd`.
///
/// The execution environment is the parameter map plus `WORKDIR`; it is
/// used for template expansion and exported to the child process. Args
/// templates that expand to an empty string are dropped; the rest are
/// split by POSIX shell rules.
pub async fn run(runner: &Runner, params: &HashMap<String, String>, cwd: &Path) -> RunOutcome {
    let mut env = params.clone();
    env.insert(WORKDIR_VAR.to_string(), cwd.display().to_string());

    let path = expand(&runner.run.path, &env);
    let mut args = Vec::new();
    for template in &runner.run.args {
        let expanded = expand(template, &env);
        if expanded.is_empty() {
            continue;
        }
        match shell_words::split(&expanded) {
            Ok(parts) => args.extend(parts),
            Err(err) => {
                return RunOutcome::failed(format!("invalid args {:?}: {}", expanded, err));
            }
        }
    }

    let started = Instant::now();
    let result = Command::new(&path)
        .args(&args)
        .current_dir(cwd)
        .envs(&env)
        .kill_on_drop(true)
        .output()
        .await;
    let duration = started.elapsed();

    match result {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let mut combined = stdout.clone();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                RunOutcome {
                    output: combined,
                    stdout,
                    duration,
                    error: None,
                }
            } else {
                let message = format!("command {:?} exited with {}", path, output.status);
                if !combined.is_empty() && !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&message);
                RunOutcome {
                    output: combined,
                    stdout,
                    duration,
                    error: Some(message),
                }
            }
        }
        Err(err) => {
            let message = format!("failed to run command {:?}: {}", path, err);
            RunOutcome {
                output: message.clone(),
                stdout: String::new(),
                duration,
                error: Some(message),
            }
        }
    }
}

/// Substitutes `$NAME` and `${NAME}` with the environment's value,
/// falling back to the process environment. Unknown names expand to the
/// empty string; a literal `$$` yields `$`.
fn expand(template: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for n in chars.by_ref() {
                    if n == '}' {
                        break;
                    }
                    name.push(n);
                }
                out.push_str(&lookup(&name, env));
            }
            Some(n) if is_name_char(*n) => {
                let mut name = String::new();
                while let Some(n) = chars.peek() {
                    if !is_name_char(*n) {
                        break;
                    }
                    name.push(*n);
                    chars.next();
                }
                out.push_str(&lookup(&name, env));
            }
            _ => out.push('$'),
        }
    }
    out
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lookup(name: &str, env: &HashMap<String, String>) -> String {
    if let Some(value) = env.get(name) {
        return value.clone();
    }
    std::env::var(name).unwrap_or_default()
}
