use std::path::PathBuf;
use std::time::Duration;

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::registry::ProbeConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Quick,
    Full,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }

    pub fn threads(&self) -> usize {
        match self {
            Profile::Quick => 1,
            Profile::Full => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn warmup_iters(&self) -> u64 {
        match self {
            Profile::Quick => 1_000,
            Profile::Full => 100_000,
        }
    }

    pub fn iters(&self) -> u64 {
        match self {
            Profile::Quick => 10_000,
            Profile::Full => 1_000_000,
        }
    }

    /// Defaults used for any probe that does not bring its own configuration.
    ///
    /// Quick is iteration bounded; full is time bounded with an iteration cap.
    pub fn probe_config(&self) -> ProbeConfig {
        match self {
            Profile::Quick => ProbeConfig {
                threads: self.threads(),
                warmup_iterations: Some(self.warmup_iters()),
                warmup_time: None,
                measurement_iterations: Some(self.iters()),
                measurement_time: None,
                forks: 1,
            },
            Profile::Full => ProbeConfig {
                threads: self.threads(),
                warmup_iterations: Some(self.warmup_iters()),
                warmup_time: Some(Duration::from_secs(5)),
                measurement_iterations: Some(self.iters()),
                measurement_time: Some(Duration::from_secs(10)),
                forks: 2,
            },
        }
    }
}

/// Where each fork executes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Forks run sequentially inside this process.
    #[default]
    Thread,
    /// Each fork re-executes the current binary as a `worker` child process.
    Process,
}

/// Run-wide settings. `Some` fields override every selected probe's own config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub profile: Profile,
    pub seed: u64,
    pub threads: Option<usize>,
    pub forks: Option<u32>,
    pub warmup_iterations: Option<u64>,
    pub warmup_time: Option<Duration>,
    pub measurement_iterations: Option<u64>,
    pub measurement_time: Option<Duration>,
    /// Deadline for each fork, measured from the fork's start.
    pub timeout: Option<Duration>,
    pub isolation: Isolation,
    /// Binary re-executed for process isolation; the running executable if unset.
    #[serde(skip)]
    pub worker_exe: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Quick,
            seed: 0,
            threads: None,
            forks: None,
            warmup_iterations: None,
            warmup_time: None,
            measurement_iterations: None,
            measurement_time: None,
            timeout: None,
            isolation: Isolation::Thread,
            worker_exe: None,
        }
    }
}

impl RunConfig {
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    /// The probe's config with the run-wide overrides applied.
    ///
    /// Setting either bound of a phase replaces both of the probe's bounds for
    /// that phase, so `--measure-iter 100` means exactly 100 iterations.
    pub fn effective(&self, base: &ProbeConfig) -> ProbeConfig {
        let mut cfg = base.clone();
        if let Some(threads) = self.threads {
            cfg.threads = threads;
        }
        if let Some(forks) = self.forks {
            cfg.forks = forks;
        }
        if self.warmup_iterations.is_some() || self.warmup_time.is_some() {
            cfg.warmup_iterations = self.warmup_iterations;
            cfg.warmup_time = self.warmup_time;
        }
        if self.measurement_iterations.is_some() || self.measurement_time.is_some() {
            cfg.measurement_iterations = self.measurement_iterations;
            cfg.measurement_time = self.measurement_time;
        }
        cfg
    }

    /// Hex SHA-256 of the serialized configuration.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_whole_phase_bounds() {
        let base = Profile::Full.probe_config();
        let run = RunConfig {
            measurement_iterations: Some(100),
            threads: Some(4),
            ..RunConfig::default()
        };
        let cfg = run.effective(&base);
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.measurement_iterations, Some(100));
        assert_eq!(cfg.measurement_time, None);
        // warm-up untouched
        assert_eq!(cfg.warmup_time, base.warmup_time);
        assert_eq!(cfg.forks, base.forks);
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let a = RunConfig::default();
        let b = RunConfig {
            seed: 7,
            ..RunConfig::default()
        };
        assert_eq!(a.digest(), RunConfig::default().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn rng_is_reproducible_for_a_seed() {
        use rand::Rng;

        let run = RunConfig {
            seed: 42,
            ..RunConfig::default()
        };
        let a: Vec<u32> = run.rng().sample_iter(rand::distributions::Standard).take(8).collect();
        let b: Vec<u32> = run.rng().sample_iter(rand::distributions::Standard).take(8).collect();
        assert_eq!(a, b);
    }
}
