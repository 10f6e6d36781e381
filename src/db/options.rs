//! Tunables handed to [`Db`](super::Db) at construction.

use super::dialect::clamp_seconds;
use rand::Rng;
use std::sync::Arc;

/// Returns the number of seconds a claimed entity waits before it becomes due
/// again. Called once per claimed batch.
pub type RefreshInterval = Arc<dyn Fn() -> f64 + Send + Sync>;

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 50;
pub const DEFAULT_INTERVAL_MIN_SECS: f64 = 100.0;
pub const DEFAULT_INTERVAL_MAX_SECS: f64 = 150.0;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// A refresh interval drawn uniformly from `[min_secs, max_secs]`, so that
/// entities discovered together drift apart over time. Negative, NaN or
/// infinite bounds count as zero.
pub fn random_refresh_interval(min_secs: f64, max_secs: f64) -> RefreshInterval {
    let (min_secs, max_secs) = (clamp_seconds(min_secs), clamp_seconds(max_secs));
    let (lo, hi) = if min_secs <= max_secs {
        (min_secs, max_secs)
    } else {
        (max_secs, min_secs)
    };
    Arc::new(move || rand::rng().random_range(lo..=hi))
}

/// A fixed refresh interval.
pub fn fixed_refresh_interval(secs: f64) -> RefreshInterval {
    Arc::new(move || secs)
}

#[derive(Clone)]
pub struct ProcessingOptions {
    /// Maximum rows per multi-row INSERT. Keeps statements under engine
    /// parameter limits.
    pub insert_batch_size: usize,
    pub refresh_interval: RefreshInterval,
    pub max_connections: u32,
}

impl ProcessingOptions {
    pub fn insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size.max(1);
        self
    }

    pub fn refresh_interval(mut self, interval: RefreshInterval) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            refresh_interval: random_refresh_interval(
                DEFAULT_INTERVAL_MIN_SECS,
                DEFAULT_INTERVAL_MAX_SECS,
            ),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl std::fmt::Debug for ProcessingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingOptions")
            .field("insert_batch_size", &self.insert_batch_size)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_interval_stays_in_range() {
        let interval = random_refresh_interval(100.0, 150.0);
        for _ in 0..200 {
            let secs = interval();
            assert!((100.0..=150.0).contains(&secs), "{secs} out of range");
        }
    }

    #[test]
    fn random_interval_accepts_swapped_bounds() {
        let interval = random_refresh_interval(10.0, 5.0);
        let secs = interval();
        assert!((5.0..=10.0).contains(&secs));
    }

    #[test]
    fn random_interval_tolerates_non_finite_bounds() {
        let interval = random_refresh_interval(f64::NAN, 20.0);
        assert!((0.0..=20.0).contains(&interval()));

        let interval = random_refresh_interval(f64::NEG_INFINITY, f64::INFINITY);
        assert_eq!(interval(), 0.0);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let options = ProcessingOptions::default().insert_batch_size(0);
        assert_eq!(options.insert_batch_size, 1);
        assert_eq!(
            ProcessingOptions::default().insert_batch_size,
            DEFAULT_INSERT_BATCH_SIZE
        );
    }

    #[test]
    fn fixed_interval() {
        assert_eq!(fixed_refresh_interval(42.0)(), 42.0);
    }
}
