//! Named probes and their per-probe configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BodyError, HarnessError, Result};

/// The timed operation. One instance is shared by every worker thread of a fork.
pub type ProbeBody = Arc<dyn Fn() -> Result<(), BodyError> + Send + Sync>;

type Setup = Arc<dyn Fn() -> Result<ProbeBody, BodyError> + Send + Sync>;

/// Threads, phase bounds and fork count for one probe.
///
/// A phase runs until its iteration bound or its time bound trips, whichever
/// comes first; an absent bound never trips. Warm-up with no bound is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub threads: usize,
    pub warmup_iterations: Option<u64>,
    pub warmup_time: Option<Duration>,
    pub measurement_iterations: Option<u64>,
    pub measurement_time: Option<Duration>,
    pub forks: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        crate::harness::Profile::Quick.probe_config()
    }
}

impl ProbeConfig {
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn forks(mut self, forks: u32) -> Self {
        self.forks = forks;
        self
    }

    /// Bound warm-up by iteration count only.
    pub fn warmup_iterations(mut self, iterations: u64) -> Self {
        self.warmup_iterations = Some(iterations);
        self.warmup_time = None;
        self
    }

    /// Bound warm-up by wall time only.
    pub fn warmup_time(mut self, time: Duration) -> Self {
        self.warmup_time = Some(time);
        self.warmup_iterations = None;
        self
    }

    pub fn without_warmup(mut self) -> Self {
        self.warmup_iterations = None;
        self.warmup_time = None;
        self
    }

    /// Bound measurement by iteration count only.
    pub fn measurement_iterations(mut self, iterations: u64) -> Self {
        self.measurement_iterations = Some(iterations);
        self.measurement_time = None;
        self
    }

    /// Bound measurement by wall time only.
    pub fn measurement_time(mut self, time: Duration) -> Self {
        self.measurement_time = Some(time);
        self.measurement_iterations = None;
        self
    }

    pub fn has_warmup(&self) -> bool {
        self.warmup_iterations.is_some() || self.warmup_time.is_some()
    }

    pub fn validate(&self, probe: &str) -> Result<()> {
        if self.threads == 0 {
            return Err(HarnessError::Configuration(format!(
                "{probe}: thread count must be at least 1"
            )));
        }
        if self.forks == 0 {
            return Err(HarnessError::Configuration(format!(
                "{probe}: fork count must be at least 1"
            )));
        }
        if self.measurement_iterations.is_none() && self.measurement_time.is_none() {
            return Err(HarnessError::Configuration(format!(
                "{probe}: measurement needs an iteration or time bound"
            )));
        }
        if self.measurement_iterations == Some(0) {
            return Err(HarnessError::Configuration(format!(
                "{probe}: measurement iterations must be positive"
            )));
        }
        if self.measurement_time == Some(Duration::ZERO) {
            return Err(HarnessError::Configuration(format!(
                "{probe}: measurement time must be positive"
            )));
        }
        Ok(())
    }
}

/// A named, configured unit of work. Immutable once built.
#[derive(Clone)]
pub struct Probe {
    name: String,
    setup: Setup,
    config: ProbeConfig,
}

impl Probe {
    /// A probe whose state is rebuilt by `setup` at the start of every fork.
    pub fn new<S, B>(name: impl Into<String>, setup: S) -> Self
    where
        S: Fn() -> Result<B, BodyError> + Send + Sync + 'static,
        B: Fn() -> Result<(), BodyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            setup: Arc::new(move || setup().map(|body| Arc::new(body) as ProbeBody)),
            config: ProbeConfig::default(),
        }
    }

    /// A probe with no per-fork state.
    pub fn stateless<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Result<(), BodyError> + Send + Sync + 'static,
    {
        let body: ProbeBody = Arc::new(body);
        Self {
            name: name.into(),
            setup: Arc::new(move || -> Result<ProbeBody, BodyError> { Ok(Arc::clone(&body)) }),
            config: ProbeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProbeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Build a fresh body for one fork.
    pub fn instantiate(&self) -> Result<ProbeBody, BodyError> {
        (self.setup)()
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Probes in registration order.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    probes: Vec<Probe>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, probe: Probe) -> Result<()> {
        if self.index.contains_key(probe.name()) {
            return Err(HarnessError::DuplicateName(probe.name().to_string()));
        }
        self.index.insert(probe.name().to_string(), self.probes.len());
        self.probes.push(probe);
        Ok(())
    }

    /// Registered probes in registration order. Each call starts over.
    pub fn list(&self) -> std::slice::Iter<'_, Probe> {
        self.probes.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Probe> {
        self.index.get(name).map(|&i| &self.probes[i])
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probes matching any of `patterns`, in registration order.
    ///
    /// Patterns are globs (`*`, `?`); `all` selects everything. A pattern that
    /// matches no probe is a configuration error.
    pub fn select(&self, patterns: &[String]) -> Result<Vec<&Probe>> {
        if patterns.is_empty() || patterns.iter().any(|p| p == "all") {
            return Ok(self.probes.iter().collect());
        }

        let compiled = patterns
            .iter()
            .map(|p| glob_to_regex(p).map(|re| (p.as_str(), re)))
            .collect::<Result<Vec<_>>>()?;

        for (pattern, re) in &compiled {
            if !self.probes.iter().any(|p| re.is_match(p.name())) {
                return Err(HarnessError::Configuration(format!(
                    "unknown probe: {pattern}"
                )));
            }
        }

        Ok(self
            .probes
            .iter()
            .filter(|p| compiled.iter().any(|(_, re)| re.is_match(p.name())))
            .collect())
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| HarnessError::Configuration(format!("bad probe pattern {pattern}: {e}")))
}
