//! Main loop half of the sidereal clock

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

use super::{ticks_since, ClockError, ClockParams, ClockShared, PpsFilter};
use util::{maths::step_towards, time::micros_since};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sidereal clock state owned by the main loop.
pub struct SiderealClock {
    params: ClockParams,
    shared: Arc<ClockShared>,

    /// Calibrated timer ticks per sidereal second. Only changed by `set_interval` and
    /// `adjust_interval`.
    interval: u64,

    filter: PpsFilter,

    /// Ratio currently applied to `interval`, slewed towards the filtered PPS ratio.
    applied_ratio: f64,

    last_pps_seq: u32,
    pps_locked: bool,
    last_ratio_update: u32,
}

/// Snapshot of the clock for telemetry.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ClockStatus {
    pub ticks: u32,
    pub interval: u64,
    pub corrected_interval: u64,
    pub pps_ratio: f64,
    pub pps_locked: bool,
    pub pps_discarded: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SiderealClock {
    /// Create the clock, using `stored_interval` if it is present and within the accepted range.
    pub fn new(params: ClockParams, stored_interval: Option<u64>) -> Self {
        let interval = match stored_interval {
            Some(i) if i >= params.min_interval && i <= params.max_interval => i,
            Some(i) => {
                warn!(
                    "Stored sidereal interval {} is out of range, using default {}",
                    i, params.default_interval
                );
                params.default_interval
            }
            None => params.default_interval,
        };

        let shared = Arc::new(ClockShared::new(interval));
        let filter = PpsFilter::new(params.pps_window_us, params.pps_filter_len);

        Self {
            params,
            shared,
            interval,
            filter,
            applied_ratio: 1.0,
            last_pps_seq: 0,
            pps_locked: false,
            last_ratio_update: 0,
        }
    }

    /// Handle to the state shared with [`super::ClockIsr`].
    pub fn shared(&self) -> Arc<ClockShared> {
        self.shared.clone()
    }

    pub fn ticks(&self) -> u32 {
        self.shared.ticks()
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Set the calibrated interval. Values outside the configured range are rejected and leave
    /// the interval unchanged.
    pub fn set_interval(&mut self, interval: u64) -> Result<(), ClockError> {
        if interval < self.params.min_interval || interval > self.params.max_interval {
            return Err(ClockError::IntervalOutOfRange(
                interval,
                self.params.min_interval,
                self.params.max_interval,
            ));
        }

        if interval != self.interval {
            info!("Sidereal interval {} -> {}", self.interval, interval);
            self.interval = interval;
            self.push();
        }

        Ok(())
    }

    /// Nudge the calibrated interval by `delta` ticks, returning the new interval.
    pub fn adjust_interval(&mut self, delta: i64) -> Result<u64, ClockError> {
        let v = (self.interval as i64).saturating_add(delta).max(0) as u64;
        self.set_interval(v)?;
        Ok(self.interval)
    }

    /// The ratio currently applied to the interval, 1.0 without PPS.
    pub fn pps_ratio(&self) -> f64 {
        self.applied_ratio
    }

    pub fn pps_locked(&self) -> bool {
        self.pps_locked
    }

    /// `interval / pps_ratio`, rounded. This is the value the clock interrupt runs at.
    pub fn ratio_corrected_interval(&self) -> u64 {
        (self.interval as f64 / self.applied_ratio).round() as u64
    }

    /// Main loop processing: consume new PPS periods, detect loss of the PPS signal and slew the
    /// applied ratio.
    pub fn service(&mut self, now_us: u32) -> ClockStatus {
        let (seq, period_us) = self.shared.pps();
        if seq != self.last_pps_seq {
            if seq.wrapping_sub(self.last_pps_seq) > 1 {
                debug!("Missed {} PPS periods", seq.wrapping_sub(self.last_pps_seq) - 1);
            }
            self.last_pps_seq = seq;

            if self.filter.sample(period_us) {
                if !self.pps_locked {
                    info!("PPS fix acquired");
                }
                self.pps_locked = true;
            } else {
                warn!("Discarding PPS period of {} us", period_us);
            }
        }

        if self.pps_locked {
            let timeout_us = (self.params.pps_timeout_s * 1e6) as u32;
            if let Some(last) = self.shared.pps_last_edge_us() {
                if micros_since(now_us, last) > timeout_us {
                    warn!("PPS fix lost, relaxing to the calibrated interval");
                    self.pps_locked = false;
                    self.filter.reset();
                }
            }
        }

        let ticks = self.shared.ticks();
        if ticks_since(ticks, self.last_ratio_update) >= self.params.ratio_update_ticks {
            self.last_ratio_update = ticks;

            let target = match self.pps_locked {
                true => self.filter.ratio().unwrap_or(1.0),
                false => 1.0,
            };
            let ratio = step_towards(self.applied_ratio, target, self.params.max_ratio_step);

            if ratio != self.applied_ratio {
                self.applied_ratio = ratio;
                self.push();
            }
        }

        self.status()
    }

    pub fn status(&self) -> ClockStatus {
        ClockStatus {
            ticks: self.shared.ticks(),
            interval: self.interval,
            corrected_interval: self.ratio_corrected_interval(),
            pps_ratio: self.applied_ratio,
            pps_locked: self.pps_locked,
            pps_discarded: self.filter.num_discarded(),
        }
    }

    fn push(&self) {
        self.shared.set_corrected_interval(self.ratio_corrected_interval());
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ClockIsr;
    use crate::hal::HwTimer;

    struct NullTimer;

    impl HwTimer for NullTimer {
        fn program_next(&mut self, _: u64) {}
    }

    /// Advance one sidereal second and deliver a PPS edge `period_us` after the previous one.
    fn second(
        clock: &mut SiderealClock,
        isr: &mut ClockIsr<NullTimer>,
        now_us: &mut u32,
        period_us: u32,
    ) -> u64 {
        for _ in 0..100 {
            isr.tick();
        }
        *now_us = now_us.wrapping_add(period_us);
        isr.pps_edge(*now_us);
        clock.service(*now_us);
        clock.ratio_corrected_interval()
    }

    #[test]
    fn test_set_interval_bounds() {
        let mut clock = SiderealClock::new(ClockParams::default(), None);
        let before = clock.interval();

        assert!(clock.set_interval(before * 2).is_err());
        assert_eq!(clock.interval(), before);

        assert_eq!(clock.adjust_interval(-10).unwrap(), before - 10);
        assert_eq!(clock.shared().corrected_interval(), before - 10);
    }

    #[test]
    fn test_stored_interval_validated() {
        let p = ClockParams::default();
        let clock = SiderealClock::new(p.clone(), Some(1));
        assert_eq!(clock.interval(), p.default_interval);
    }

    #[test]
    fn test_anomalous_pps_bounded() {
        let params = ClockParams::default();
        let max_step = params.max_ratio_step;
        let mut clock = SiderealClock::new(params, None);
        let mut isr = ClockIsr::new(clock.shared(), NullTimer);
        let mut now = 0u32;

        isr.pps_edge(now);
        for _ in 0..5 {
            second(&mut clock, &mut isr, &mut now, 1_000_000);
        }
        assert!(clock.pps_locked());
        let settled = clock.ratio_corrected_interval();
        assert_eq!(settled, clock.interval());

        // A 2x period is discarded entirely
        let after = second(&mut clock, &mut isr, &mut now, 2_000_000);
        assert_eq!(after, settled);
        assert_eq!(clock.status().pps_discarded, 1);

        // An in-window outlier moves the interval by no more than one ratio step
        let bound = (settled as f64 * max_step * 1.01).ceil() as u64 + 1;
        let after = second(&mut clock, &mut isr, &mut now, 1_000_900);
        let change = (after as i64 - settled as i64).abs() as u64;
        assert!(change > 0);
        assert!(change <= bound, "change {} > bound {}", change, bound);
    }

    #[test]
    fn test_converges_to_pps_and_relaxes_on_loss() {
        let mut clock = SiderealClock::new(ClockParams::default(), None);
        let mut isr = ClockIsr::new(clock.shared(), NullTimer);
        let mut now = 0u32;
        isr.pps_edge(now);

        // Local oscillator 20 ppm fast: a true second measures 1_000_020 us
        for _ in 0..400 {
            second(&mut clock, &mut isr, &mut now, 1_000_020);
        }
        let expected = clock.interval() as f64 * 1.00002;
        let corrected = clock.ratio_corrected_interval() as f64;
        assert!((corrected - expected).abs() < 2.0, "{} vs {}", corrected, expected);

        // No more edges: fix lost, ratio returns towards one
        for _ in 0..400 {
            for _ in 0..100 {
                isr.tick();
            }
            now = now.wrapping_add(1_000_000);
            clock.service(now);
        }
        assert!(!clock.pps_locked());
        assert_eq!(clock.pps_ratio(), 1.0);
    }
}
