use crossbeam::utils::CachePadded;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rand::Rng;

use super::{stripe_count, stripe_index};
use crate::error::Result;
use crate::registry::{Probe, ProbeConfig, Registry};

const LOWEST: u64 = 1;
const HIGHEST: u64 = 60_000;
const SIGFIG: u8 = 3;
const WINDOW: u64 = 1_000;

/// Running average with min and max.
///
/// Once `capacity` values have been seen the average stops weighting every
/// value equally and decays like an exponential moving average with
/// weight `1 / capacity`, so it follows recent values.
#[derive(Debug, Clone)]
pub struct AverageMinMax {
    capacity: u64,
    count: u64,
    average: f64,
    min: u64,
    max: u64,
}

impl AverageMinMax {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            count: 0,
            average: 0.0,
            min: u64::MAX,
            max: 0,
        }
    }

    pub fn add(&mut self, value: u64) {
        if self.count < self.capacity {
            self.count += 1;
        }
        self.average += (value as f64 - self.average) / self.count as f64;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

fn random_value() -> u64 {
    rand::thread_rng().gen_range(1..=1_000)
}

fn histogram() -> Result<Histogram<u64>, hdrhistogram::CreationError> {
    Histogram::new_with_bounds(LOWEST, HIGHEST, SIGFIG)
}

pub fn register(reg: &mut Registry, base: &ProbeConfig) -> Result<()> {
    reg.register(
        Probe::new("average_min_max", || {
            let avg = Mutex::new(AverageMinMax::new(WINDOW));
            Ok(move || {
                avg.lock().add(random_value());
                Ok(())
            })
        })
        .with_config(base.clone()),
    )?;

    reg.register(
        Probe::new("hdr_histogram_std_mutex", || {
            let h = std::sync::Mutex::new(histogram()?);
            Ok(move || {
                let value = random_value();
                h.lock()
                    .map_err(|e| e.to_string())?
                    .saturating_record(value);
                Ok(())
            })
        })
        .with_config(base.clone()),
    )?;

    reg.register(
        Probe::new("hdr_histogram_parking_lot", || {
            let h = Mutex::new(histogram()?);
            Ok(move || {
                let value = random_value();
                h.lock().saturating_record(value);
                Ok(())
            })
        })
        .with_config(base.clone()),
    )?;

    let stripes = stripe_count(base);
    reg.register(
        Probe::new("hdr_histogram_striped", move || {
            let shards = (0..stripes)
                .map(|_| histogram().map(|h| CachePadded::new(Mutex::new(h))))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(move || {
                let value = random_value();
                shards[stripe_index() % shards.len()]
                    .lock()
                    .saturating_record(value);
                Ok(())
            })
        })
        .with_config(base.clone()),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_exact_within_capacity() {
        let mut avg = AverageMinMax::new(10);
        for v in [2, 4, 6, 8] {
            avg.add(v);
        }
        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 5.0).abs() < 1e-9);
        assert_eq!(avg.min(), Some(2));
        assert_eq!(avg.max(), Some(8));
    }

    #[test]
    fn average_follows_recent_values_past_capacity() {
        let mut avg = AverageMinMax::new(4);
        for _ in 0..4 {
            avg.add(100);
        }
        for _ in 0..100 {
            avg.add(0);
        }
        assert_eq!(avg.count(), 4);
        assert!(avg.average() < 1.0);
        assert_eq!(avg.min(), Some(0));
        assert_eq!(avg.max(), Some(100));
    }

    #[test]
    fn empty_accumulator_has_no_extremes() {
        let avg = AverageMinMax::new(0);
        assert_eq!(avg.min(), None);
        assert_eq!(avg.max(), None);
        assert_eq!(avg.average(), 0.0);
    }

    #[test]
    fn histogram_bounds_are_valid() {
        let mut h = histogram().unwrap();
        h.saturating_record(HIGHEST * 2);
        assert_eq!(h.len(), 1);
    }
}
