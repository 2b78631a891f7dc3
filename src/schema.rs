use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::stats::Summary;

/// Portion of a probe's execution an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Building the fork's fresh probe state.
    Setup,
    Warmup,
    Measurement,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "setup",
            Phase::Warmup => "warmup",
            Phase::Measurement => "measurement",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The body returned an `Err`.
    Error,
    Panic,
    /// An isolated worker process died or produced no result.
    Crash,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Error => "error",
            FailureKind::Panic => "panic",
            FailureKind::Crash => "crash",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub phase: Phase,
    pub thread_index: usize,
    pub message: String,
}

/// Aggregated statistics for one probe in one fork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe_name: String,
    pub fork_index: u32,
    pub threads: usize,

    pub sample_count: u64,
    pub mean_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub stddev_ns: f64,
    pub ops_per_sec: f64,

    pub incomplete: bool,
    pub failed: bool,
    pub failure: Option<FailureInfo>,
}

impl ProbeResult {
    pub fn new(
        probe_name: impl Into<String>,
        fork_index: u32,
        threads: usize,
        summary: Option<Summary>,
    ) -> Self {
        let summary = summary.unwrap_or_default();
        // Throughput of all threads running concurrently, as ops/s.
        let ops_per_sec = if summary.mean_ns > 0.0 {
            threads as f64 * 1e9 / summary.mean_ns
        } else {
            0.0
        };
        Self {
            probe_name: probe_name.into(),
            fork_index,
            threads,
            sample_count: summary.count,
            mean_ns: summary.mean_ns,
            min_ns: summary.min_ns,
            max_ns: summary.max_ns,
            stddev_ns: summary.stddev_ns,
            ops_per_sec,
            incomplete: false,
            failed: false,
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: FailureInfo) -> Self {
        self.failed = true;
        self.failure = Some(failure);
        self
    }

    pub fn mark_incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }

    /// Coefficient of variation (stddev / mean); zero when there is no mean.
    pub fn cv(&self) -> f64 {
        if self.mean_ns > 0.0 {
            self.stddev_ns / self.mean_ns
        } else {
            0.0
        }
    }

    pub fn status(&self) -> &'static str {
        match (self.failed, self.incomplete) {
            (true, _) => "failed",
            (false, true) => "incomplete",
            (false, false) => "ok",
        }
    }

    /// The terminal error this result represents, if any.
    pub fn error(&self) -> Option<HarnessError> {
        self.failure.as_ref().map(|f| HarnessError::ProbeExecution {
            probe: self.probe_name.clone(),
            phase: f.phase,
            fork: self.fork_index,
            thread: f.thread_index,
            message: format!("{}: {}", f.kind, f.message),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub bench_version: String,
    pub profile: String,
    pub seed: u64,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
    /// SHA-256 of the effective run configuration.
    pub config_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunMeta,
    pub results: Vec<ProbeResult>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| r.failed)
    }
}
