//! Runs probes through fork / warm-up / measurement cycles.
//!
//! For every fork a probe gets fresh state from its setup, then `threads`
//! scoped workers wait on a start barrier, run warm-up, meet at a phase
//! barrier and run measurement. Each worker reaches both barriers exactly
//! once no matter how its phases end, so a failing or timed-out thread never
//! strands its siblings. Workers only reach the start barrier once every one
//! of them has been spawned; if spawning fails they leave without touching it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, info_span, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{HarnessError, Result};
use crate::harness::{Isolation, RunConfig};
use crate::isolation;
use crate::registry::{Probe, ProbeBody, ProbeConfig};
use crate::schema::{FailureInfo, FailureKind, Phase, ProbeResult};
use crate::stats::{Accumulator, StripedStats};

pub struct Scheduler {
    config: RunConfig,
    clock: Arc<dyn Clock>,
    accumulator: Accumulator,
}

impl Scheduler {
    pub fn new(config: RunConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: RunConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            accumulator: Accumulator::default(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Resolve and validate every probe's effective config up front, so a bad
    /// configuration fails the run before anything executes.
    pub fn plan<'a, I>(&self, probes: I) -> Result<Vec<(&'a Probe, ProbeConfig)>>
    where
        I: IntoIterator<Item = &'a Probe>,
    {
        probes
            .into_iter()
            .map(|probe| {
                let cfg = self.config.effective(probe.config());
                cfg.validate(probe.name())?;
                Ok((probe, cfg))
            })
            .collect()
    }

    /// Run the probes in the given order; one result per probe per fork.
    pub fn run<'a, I>(&self, probes: I) -> Result<Vec<ProbeResult>>
    where
        I: IntoIterator<Item = &'a Probe>,
    {
        let plan = self.plan(probes)?;
        let mut results = Vec::new();
        for (probe, cfg) in plan {
            results.extend(self.run_probe(probe, &cfg));
        }
        Ok(results)
    }

    fn run_probe(&self, probe: &Probe, cfg: &ProbeConfig) -> Vec<ProbeResult> {
        let span = info_span!("probe", name = probe.name());
        let _enter = span.enter();
        info!(
            threads = cfg.threads,
            forks = cfg.forks,
            warmup = cfg.has_warmup(),
            "running probe"
        );

        let mut results = Vec::with_capacity(cfg.forks as usize);
        for fork in 0..cfg.forks {
            let result = match self.config.isolation {
                Isolation::Thread => self.run_fork(probe, cfg, fork),
                Isolation::Process => {
                    isolation::run_fork_in_child(probe.name(), cfg, fork, &self.config)
                }
            };
            let failed = result.failed;
            if let Some(err) = result.error() {
                warn!(%err, "probe failed");
            }
            results.push(result);
            if failed {
                if fork + 1 < cfg.forks {
                    warn!(skipped = cfg.forks - fork - 1, "skipping remaining forks");
                }
                break;
            }
        }
        results
    }

    /// Execute a single fork of `probe` in this process.
    pub fn run_fork(&self, probe: &Probe, cfg: &ProbeConfig, fork: u32) -> ProbeResult {
        let span = info_span!("fork", index = fork);
        let _enter = span.enter();

        let fork_start = self.clock.now_ns();
        let deadline = self
            .config
            .timeout
            .map(|t| fork_start.saturating_add(duration_ns(t)));

        let body = match probe.instantiate() {
            Ok(body) => body,
            Err(e) => {
                return ProbeResult::new(probe.name(), fork, cfg.threads, None).with_failure(
                    FailureInfo {
                        kind: FailureKind::Error,
                        phase: Phase::Setup,
                        thread_index: 0,
                        message: e.to_string(),
                    },
                );
            }
        };

        let state = ForkState {
            body,
            stats: self.accumulator.handle(probe.name()),
            clock: self.clock.as_ref(),
            cfg,
            deadline,
            gate: StartGate::default(),
            start: Barrier::new(cfg.threads),
            phase: Barrier::new(cfg.threads),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
            timed_out: Mutex::new(None),
        };

        let joined = crossbeam::scope(|scope| {
            for thread in 0..cfg.threads {
                let state = &state;
                let spawned = scope
                    .builder()
                    .name(format!("probe-worker-{thread}"))
                    .spawn(move |_| state.worker(thread));
                if let Err(e) = spawned {
                    state.fail(
                        FailureKind::Error,
                        Phase::Setup,
                        thread,
                        format!("cannot spawn worker thread: {e}"),
                    );
                    state.gate.release(false);
                    return;
                }
            }
            state.gate.release(true);
        });
        if let Err(payload) = joined {
            state.fail(
                FailureKind::Panic,
                Phase::Measurement,
                0,
                panic_message(payload.as_ref()),
            );
        }

        let summary = self.accumulator.drain(probe.name()).ok();
        let mut result = ProbeResult::new(probe.name(), fork, cfg.threads, summary);

        if let Some(phase) = state.timed_out.lock().take() {
            let err = HarnessError::Timeout {
                probe: probe.name().to_string(),
                phase,
                fork,
            };
            warn!(%err, samples = result.sample_count, "phase truncated");
            result = result.mark_incomplete();
        }
        if let Some(failure) = state.failure.lock().take() {
            result = result.with_failure(failure);
        }

        debug!(
            samples = result.sample_count,
            mean_ns = result.mean_ns,
            status = result.status(),
            "fork finished"
        );
        result
    }
}

struct ForkState<'a> {
    body: ProbeBody,
    stats: Arc<StripedStats>,
    clock: &'a dyn Clock,
    cfg: &'a ProbeConfig,
    deadline: Option<u64>,
    gate: StartGate,
    start: Barrier,
    phase: Barrier,
    abort: AtomicBool,
    failure: Mutex<Option<FailureInfo>>,
    timed_out: Mutex<Option<Phase>>,
}

impl ForkState<'_> {
    fn worker(&self, thread: usize) {
        if !self.gate.wait() {
            return;
        }
        self.start.wait();
        self.run_phase(
            thread,
            Phase::Warmup,
            self.cfg.warmup_iterations,
            self.cfg.warmup_time,
        );
        self.phase.wait();
        self.run_phase(
            thread,
            Phase::Measurement,
            self.cfg.measurement_iterations,
            self.cfg.measurement_time,
        );
    }

    fn run_phase(
        &self,
        thread: usize,
        phase: Phase,
        iterations: Option<u64>,
        time: Option<Duration>,
    ) {
        if iterations.is_none() && time.is_none() {
            return;
        }
        let record = phase == Phase::Measurement;

        let mut now = self.clock.now_ns();
        let phase_end = time.map(|t| now.saturating_add(duration_ns(t)));
        let mut done = 0u64;

        while iterations.map_or(true, |n| done < n) {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            if phase_end.is_some_and(|end| now >= end) {
                break;
            }
            if self.deadline.is_some_and(|d| now >= d) {
                self.timed_out.lock().get_or_insert(phase);
                break;
            }

            let started = self.clock.now_ns();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.body)()));
            now = self.clock.now_ns();

            match outcome {
                Ok(Ok(())) => {
                    if record {
                        self.stats.record(thread, now.saturating_sub(started));
                    }
                }
                Ok(Err(e)) => {
                    self.fail(FailureKind::Error, phase, thread, e.to_string());
                    break;
                }
                Err(payload) => {
                    self.fail(FailureKind::Panic, phase, thread, panic_message(payload.as_ref()));
                    break;
                }
            }
            done += 1;
        }
    }

    /// First failure wins; every worker stops at its next iteration boundary.
    fn fail(&self, kind: FailureKind, phase: Phase, thread: usize, message: String) {
        self.abort.store(true, Ordering::Relaxed);
        self.failure.lock().get_or_insert(FailureInfo {
            kind,
            phase,
            thread_index: thread,
            message,
        });
    }
}

/// One-shot latch: opened once all workers exist, or closed if spawning failed.
#[derive(Default)]
struct StartGate {
    open: Mutex<Option<bool>>,
    changed: Condvar,
}

impl StartGate {
    /// Block until released; `true` means every worker was spawned.
    fn wait(&self) -> bool {
        let mut open = self.open.lock();
        loop {
            if let Some(go) = *open {
                return go;
            }
            self.changed.wait(&mut open);
        }
    }

    fn release(&self, go: bool) {
        *self.open.lock() = Some(go);
        self.changed.notify_all();
    }
}

pub(crate) fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
