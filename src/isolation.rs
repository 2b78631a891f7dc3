//! Process-level fork isolation.
//!
//! The supervising process re-executes its own binary with the hidden
//! `worker` subcommand, one child per fork. The child rebuilds its registry,
//! runs exactly one fork in-process and prints the `ProbeResult` as a single
//! JSON line on stdout. Anything the child writes to stderr (logs, panic
//! messages) passes straight through.

use std::io;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::harness::{Isolation, RunConfig};
use crate::registry::{ProbeConfig, Registry};
use crate::scheduler::{duration_ns, Scheduler};
use crate::schema::{FailureInfo, FailureKind, Phase, ProbeResult};

/// Name of the subcommand a binary must expose to serve isolated forks.
pub const WORKER_COMMAND: &str = "worker";

/// Arguments handed to a worker child.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub probe: String,
    pub fork: u32,
    pub config: ProbeConfig,
    pub timeout: Option<Duration>,
}

impl WorkerRequest {
    /// Decode the `--config` JSON argument.
    pub fn parse_config(json: &str) -> Result<ProbeConfig> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Run one fork in a child process; a child that cannot be started, dies, or
/// prints no result yields a failed result of kind `crash`.
pub fn run_fork_in_child(
    probe: &str,
    cfg: &ProbeConfig,
    fork: u32,
    run: &RunConfig,
) -> ProbeResult {
    spawn_worker(probe, cfg, fork, run).unwrap_or_else(|e| {
        ProbeResult::new(probe, fork, cfg.threads, None).with_failure(FailureInfo {
            kind: FailureKind::Crash,
            phase: Phase::Setup,
            thread_index: 0,
            message: e.to_string(),
        })
    })
}

fn spawn_worker(probe: &str, cfg: &ProbeConfig, fork: u32, run: &RunConfig) -> Result<ProbeResult> {
    let exe = match &run.worker_exe {
        Some(exe) => exe.clone(),
        None => std::env::current_exe()?,
    };
    let mut cmd = Command::new(exe);
    cmd.arg("--profile")
        .arg(run.profile.as_str())
        .arg("--seed")
        .arg(run.seed.to_string())
        .arg(WORKER_COMMAND)
        .arg("--probe")
        .arg(probe)
        .arg("--fork")
        .arg(fork.to_string())
        .arg("--config")
        .arg(serde_json::to_string(cfg)?);
    if let Some(timeout) = run.timeout {
        cmd.arg("--timeout-ns").arg(duration_ns(timeout).to_string());
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    debug!(probe, fork, "spawning worker process");
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(HarnessError::Io(io::Error::other(format!(
            "worker for {probe} fork {fork} exited with {}",
            output.status
        ))));
    }
    parse_worker_output(&String::from_utf8_lossy(&output.stdout))
}

/// The last non-empty stdout line carries the result.
pub fn parse_worker_output(stdout: &str) -> Result<ProbeResult> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| HarnessError::Io(io::Error::other("worker produced no result")))?;
    Ok(serde_json::from_str(line)?)
}

/// Child side: run the requested fork in-process and encode its result.
pub fn serve_worker(
    registry: &Registry,
    request: &WorkerRequest,
    run: &RunConfig,
) -> Result<String> {
    let probe = registry
        .get(&request.probe)
        .ok_or_else(|| HarnessError::Configuration(format!("unknown probe: {}", request.probe)))?;
    request.config.validate(probe.name())?;

    let run = RunConfig {
        timeout: request.timeout,
        isolation: Isolation::Thread,
        ..run.clone()
    };
    let result = Scheduler::new(run).run_fork(probe, &request.config, request.fork);
    Ok(serde_json::to_string(&result)?)
}
