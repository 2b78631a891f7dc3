//! Running count/mean/min/max/variance per probe.
//!
//! Every probe owns a [`StripedStats`]: a set of cache-padded shards, each
//! behind its own lock. Worker thread `t` records into shard `t % shards`, so
//! when a probe has at most as many threads as shards no two workers ever
//! touch the same lock. Shards are merged (Chan et al. parallel variance) only
//! when the probe is drained.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Merged statistics for a drained probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: u64,
    pub mean_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
    /// Sample standard deviation (n - 1 denominator).
    pub stddev_ns: f64,
}

#[derive(Debug, Clone, Copy)]
struct Shard {
    count: u64,
    mean: f64,
    m2: f64,
    min: u64,
    max: u64,
}

impl Shard {
    const EMPTY: Shard = Shard {
        count: 0,
        mean: 0.0,
        m2: 0.0,
        min: u64::MAX,
        max: 0,
    };

    #[inline]
    fn push(&mut self, value: u64) {
        self.count += 1;
        let x = value as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &Shard) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    fn summary(&self) -> Option<Summary> {
        if self.count == 0 {
            return None;
        }
        let variance = if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        };
        Some(Summary {
            count: self.count,
            mean_ns: self.mean,
            min_ns: self.min,
            max_ns: self.max,
            stddev_ns: variance.max(0.0).sqrt(),
        })
    }
}

/// Sharded accumulator for a single probe.
pub struct StripedStats {
    shards: Box<[CachePadded<Mutex<Shard>>]>,
}

impl StripedStats {
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| CachePadded::new(Mutex::new(Shard::EMPTY)))
            .collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn record(&self, thread_id: usize, duration_ns: u64) {
        self.shards[thread_id % self.shards.len()]
            .lock()
            .push(duration_ns);
    }

    /// Samples recorded so far, without resetting.
    pub fn count(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().count).sum()
    }

    /// Merge all shards, reset them, and return the merged statistics.
    pub fn drain(&self) -> Option<Summary> {
        let mut merged = Shard::EMPTY;
        for shard in self.shards.iter() {
            let taken = std::mem::replace(&mut *shard.lock(), Shard::EMPTY);
            merged.merge(&taken);
        }
        merged.summary()
    }
}

impl std::fmt::Debug for StripedStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedStats")
            .field("shards", &self.shards.len())
            .field("count", &self.count())
            .finish()
    }
}

/// Per-probe statistics keyed by probe name.
#[derive(Debug)]
pub struct Accumulator {
    shards_per_probe: usize,
    probes: RwLock<HashMap<String, Arc<StripedStats>>>,
}

impl Accumulator {
    pub fn new(shards_per_probe: usize) -> Self {
        Self {
            shards_per_probe: shards_per_probe.max(1),
            probes: RwLock::new(HashMap::new()),
        }
    }

    /// The probe's stats, created on first use. Workers hold on to this so the
    /// name lookup happens once per fork rather than once per sample.
    pub fn handle(&self, probe_name: &str) -> Arc<StripedStats> {
        if let Some(stats) = self.probes.read().get(probe_name) {
            return Arc::clone(stats);
        }
        let mut probes = self.probes.write();
        Arc::clone(
            probes
                .entry(probe_name.to_string())
                .or_insert_with(|| Arc::new(StripedStats::new(self.shards_per_probe))),
        )
    }

    pub fn record(&self, probe_name: &str, thread_id: usize, duration_ns: u64) {
        self.handle(probe_name).record(thread_id, duration_ns);
    }

    /// Merge and reset the probe's statistics.
    pub fn drain(&self, probe_name: &str) -> Result<Summary> {
        let stats = self
            .probes
            .read()
            .get(probe_name)
            .cloned()
            .ok_or_else(|| HarnessError::NotFound(probe_name.to_string()))?;
        stats
            .drain()
            .ok_or_else(|| HarnessError::NotFound(probe_name.to_string()))
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        let shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_unknown_probe_is_not_found() {
        let acc = Accumulator::new(4);
        assert!(matches!(acc.drain("nope"), Err(HarnessError::NotFound(_))));
    }

    #[test]
    fn drain_with_zero_samples_is_not_found() {
        let acc = Accumulator::new(4);
        let _ = acc.handle("empty");
        assert!(matches!(acc.drain("empty"), Err(HarnessError::NotFound(_))));
    }

    #[test]
    fn drain_merges_shards_and_resets() {
        let acc = Accumulator::new(3);
        for (thread, value) in [(0, 10), (1, 20), (2, 30), (3, 40)] {
            acc.record("p", thread, value);
        }
        let s = acc.drain("p").unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.min_ns, 10);
        assert_eq!(s.max_ns, 40);
        assert!((s.mean_ns - 25.0).abs() < 1e-9);
        // sample stddev of 10,20,30,40
        assert!((s.stddev_ns - 12.909_944_487).abs() < 1e-6);

        assert!(matches!(acc.drain("p"), Err(HarnessError::NotFound(_))));
    }

    #[test]
    fn single_sample_has_zero_stddev() {
        let stats = StripedStats::new(2);
        stats.record(7, 5);
        let s = stats.drain().unwrap();
        assert_eq!(s.count, 1);
        assert_eq!(s.stddev_ns, 0.0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let acc = Accumulator::new(8);
        let threads = 8;
        let per_thread = 10_000u64;
        crossbeam::scope(|scope| {
            for t in 0..threads {
                let acc = &acc;
                scope.spawn(move |_| {
                    for i in 0..per_thread {
                        acc.record("hot", t, i % 100);
                    }
                });
            }
        })
        .unwrap();
        let s = acc.drain("hot").unwrap();
        assert_eq!(s.count, threads as u64 * per_thread);
        assert_eq!(s.min_ns, 0);
        assert_eq!(s.max_ns, 99);
    }
}
