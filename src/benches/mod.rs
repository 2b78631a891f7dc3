//! Built-in probe suite.
//!
//! Probes come in comparison pairs or groups: a running average/min/max
//! accumulator against histogram variants, lock-based against atomic
//! accumulation, pre-sized against growing containers, and so on. Every
//! stateful probe builds its shared structure in setup, so each fork starts
//! from a cold instance.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::harness::RunConfig;
use crate::registry::{ProbeConfig, Registry};

pub mod accumulators;

/// Every built-in probe, registered with the profile's default config.
pub fn registry(run: &RunConfig) -> Result<Registry> {
    let base = base_config(run);
    let mut reg = Registry::new();
    accumulators::register(&mut reg, &base)?;
    sync::register(&mut reg, &base)?;
    collections::register(&mut reg, &base)?;
    random::register(&mut reg, &base, run.rng())?;
    misc::register(&mut reg, &base)?;
    Ok(reg)
}

/// The profile's probe config with the run-wide overrides applied.
///
/// Striped probes size their structures from this at registration time, so
/// `--threads` must already be folded in.
pub fn base_config(run: &RunConfig) -> ProbeConfig {
    run.effective(&run.profile.probe_config())
}

/// One stripe per worker thread.
pub fn stripe_count(config: &ProbeConfig) -> usize {
    config.threads.max(1)
}

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE: usize = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed);
}

/// Stable per-thread index used to pick a stripe in striped structures.
#[inline]
pub fn stripe_index() -> usize {
    STRIPE.with(|s| *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Profile;

    #[test]
    fn builtin_suite_registers_without_conflicts() {
        let reg = registry(&RunConfig::default()).unwrap();
        assert!(reg.len() >= 20);
        assert!(reg.get("average_min_max").is_some());
        assert!(reg.get("construct_indirect").is_some());
        assert!(reg.get("existing_deque_len").is_some());
    }

    #[test]
    fn builtin_suite_runs_briefly() {
        let run = RunConfig {
            profile: Profile::Quick,
            threads: Some(2),
            warmup_iterations: Some(5),
            measurement_iterations: Some(20),
            ..RunConfig::default()
        };
        let reg = registry(&run).unwrap();
        let results = crate::Scheduler::new(run).run(reg.list()).unwrap();
        assert_eq!(results.len(), reg.len());
        for r in &results {
            assert!(!r.failed, "{} failed: {:?}", r.probe_name, r.failure);
            assert_eq!(r.sample_count, 40, "{}", r.probe_name);
        }
    }

    #[test]
    fn thread_override_sizes_stripes() {
        let run = RunConfig {
            profile: Profile::Quick,
            threads: Some(4),
            ..RunConfig::default()
        };
        assert_eq!(Profile::Quick.probe_config().threads, 1);
        let base = base_config(&run);
        assert_eq!(stripe_count(&base), 4);
        assert_eq!(sync::StripedCounter::new(stripe_count(&base)).stripes(), 4);

        let reg = registry(&run).unwrap();
        for name in ["striped_counter_add", "hdr_histogram_striped"] {
            assert_eq!(reg.get(name).unwrap().config().threads, 4, "{name}");
        }
    }

    #[test]
    fn stripe_index_is_stable_per_thread_and_distinct_across_threads() {
        let here = stripe_index();
        assert_eq!(here, stripe_index());
        let there = std::thread::spawn(stripe_index).join().unwrap();
        assert_ne!(here, there);
    }
}
