use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use gatekeeper_core::errors::ValidationDefect;
use gatekeeper_core::spec::PipelineConfig;
use gatekeeper_core::traits::{RunContext, ValidationHandler, ValidationReport};
use gatekeeper_engine::ValidationRegistry;

/// Environment variable carrying the run context as JSON.
pub const CONTEXT_ENV: &str = "GATEKEEPER_CONTEXT";

/// Keep this many trailing bytes of captured output in outcome details.
const OUTPUT_TAIL: usize = 2048;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A validation backed by an external program: passes iff it exits 0.
///
/// Under a deadline the program runs in its own process group, and the
/// whole group is killed and reaped when the deadline passes.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandCheck {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandCheck {
    fn spawn(&self, ctx: &RunContext) -> Result<Child, ValidationDefect> {
        let context_json = serde_json::to_string(ctx)
            .map_err(|e| ValidationDefect::new(format!("cannot encode run context: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(CONTEXT_ENV, context_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let program = &self.program;
        debug!(%program, args = ?self.args, "running command check");
        // Spawn failure means the check itself is broken, not that it failed.
        cmd.spawn()
            .map_err(|e| ValidationDefect::new(format!("cannot run '{program}': {e}")))
    }

    fn report(&self, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> ValidationReport {
        let details = json!({
            "exit_code": status.code(),
            "stdout": tail(stdout),
            "stderr": tail(stderr),
        });
        if status.success() {
            ValidationReport::pass(details)
        } else {
            let reason = match status.code() {
                Some(code) => format!("'{}' exited with status {code}", self.program),
                None => format!("'{}' was terminated by a signal", self.program),
            };
            ValidationReport::fail(reason, details)
        }
    }

    fn wait_failed(&self, e: std::io::Error) -> ValidationDefect {
        ValidationDefect::new(format!("cannot wait for '{}': {e}", self.program))
    }
}

impl ValidationHandler for CommandCheck {
    fn check(&self, ctx: &RunContext) -> Result<ValidationReport, ValidationDefect> {
        let out = self
            .spawn(ctx)?
            .wait_with_output()
            .map_err(|e| self.wait_failed(e))?;
        Ok(self.report(out.status, &out.stdout, &out.stderr))
    }

    fn honors_deadline(&self) -> bool {
        true
    }

    fn check_within(
        &self,
        ctx: &RunContext,
        limit: Duration,
    ) -> Result<ValidationReport, ValidationDefect> {
        let started = Instant::now();
        let mut child = self.spawn(ctx)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Ok(self.report(status, &collect(stdout), &collect(stderr)));
                }
                Ok(None) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        terminate(&mut child);
                        warn!(
                            program = %self.program,
                            limit_ms = limit.as_millis() as u64,
                            "command check killed at deadline"
                        );
                        return Err(ValidationDefect::timed_out(limit));
                    }
                    thread::sleep(remaining.min(POLL_INTERVAL));
                }
                Err(e) => {
                    terminate(&mut child);
                    return Err(self.wait_failed(e));
                }
            }
        }
    }
}

/// Kill the child's process group, then the child itself, and reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        if let Err(e) = Command::new("kill").args(["-KILL", "--", &group]).status() {
            warn!(pid = child.id(), "cannot signal process group: {e}");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(OUTPUT_TAIL);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Parse the document's `checks` table. Malformed entries are returned
/// alongside the registry built from the well-formed ones.
pub fn load_checks(
    config: &PipelineConfig,
) -> (ValidationRegistry, Vec<(String, serde_json::Error)>) {
    let mut registry = ValidationRegistry::new();
    let mut invalid = Vec::new();
    for (name, spec) in &config.checks {
        match serde_json::from_value::<CommandCheck>(spec.clone()) {
            Ok(check) => {
                registry.register(name, check);
            }
            Err(e) => invalid.push((name.clone(), e)),
        }
    }
    (registry, invalid)
}

/// Build a registry from the document's `checks` table, rejecting any
/// malformed entry.
pub fn registry_from_config(config: &PipelineConfig) -> Result<ValidationRegistry> {
    let (registry, invalid) = load_checks(config);
    if let Some((name, e)) = invalid.into_iter().next() {
        return Err(e).with_context(|| format!("checks.{name}: invalid command check"));
    }
    Ok(registry)
}
