//! PPS period filter

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use util::time::MICROS_PER_SECOND;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Exponential average of PPS edge-to-edge periods with outlier rejection.
///
/// Samples further than `window_us` from one second are rejected outright, so a single glitch
/// never reaches the average. Accepted samples move the average by `1/len` of their error.
#[derive(Debug, Clone)]
pub struct PpsFilter {
    window_us: u32,
    len: u32,
    avg_us: Option<f64>,
    accepted: u64,
    discarded: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PpsFilter {
    pub fn new(window_us: u32, len: u32) -> Self {
        Self {
            window_us,
            len: len.max(1),
            avg_us: None,
            accepted: 0,
            discarded: 0,
        }
    }

    /// Feed one period into the filter, returning `true` if it was accepted.
    pub fn sample(&mut self, period_us: u32) -> bool {
        let err = (period_us as i64 - MICROS_PER_SECOND as i64).abs();
        if err > self.window_us as i64 {
            self.discarded += 1;
            return false;
        }

        let p = period_us as f64;
        self.avg_us = Some(match self.avg_us {
            Some(avg) => avg + (p - avg) / self.len as f64,
            None => p,
        });
        self.accepted += 1;

        true
    }

    /// Wall-clock to sidereal-tick ratio implied by the averaged period, `None` before the first
    /// accepted sample.
    pub fn ratio(&self) -> Option<f64> {
        self.avg_us.map(|avg| MICROS_PER_SECOND as f64 / avg)
    }

    pub fn avg_period_us(&self) -> Option<f64> {
        self.avg_us
    }

    pub fn num_accepted(&self) -> u64 {
        self.accepted
    }

    pub fn num_discarded(&self) -> u64 {
        self.discarded
    }

    pub fn reset(&mut self) {
        self.avg_us = None;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_outliers_discarded() {
        let mut f = PpsFilter::new(1000, 10);
        assert!(f.sample(1_000_010));
        assert!(!f.sample(2_000_000));
        assert!(!f.sample(500_000));
        assert_eq!(f.avg_period_us(), Some(1_000_010.0));
        assert_eq!(f.num_discarded(), 2);
    }

    #[test]
    fn test_converges_monotonically() {
        let mut f = PpsFilter::new(1000, 10);
        f.sample(1_000_000);

        let mut last = 1_000_000.0;
        for _ in 0..200 {
            f.sample(1_000_100);
            let avg = f.avg_period_us().unwrap();
            assert!(avg >= last && avg <= 1_000_100.0);
            last = avg;
        }
        assert!((last - 1_000_100.0).abs() < 0.1);
        assert!(f.ratio().unwrap() < 1.0);
    }
}
