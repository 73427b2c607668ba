//! # Rate table
//!
//! Translates logical rates, expressed as multiples of the sidereal rate, into the two quantities
//! the axes consume:
//!
//! - a timer rate (hardware timer ticks between step pulses), pushed to the axis interrupt, and
//! - a fixed point target advance per clock tick, applied by the main loop.
//!
//! The table is built once at boot from the axis parameters. The acceleration distance is derived
//! at that point and never recomputed, only the sidereal base rate follows later interval
//! changes.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod compensation;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use compensation::{compensate, equ_to_hor, Atmosphere, RateCompensation, TrackingRates};

use crate::axis::{AxisId, AxisParams, NUM_AXES};
use crate::clock::TICKS_PER_SECOND;
use crate::fixed::Fixed;
use crate::hal::TIMER_TICKS_PER_S;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of entries in the guide rate ladder.
pub const NUM_GUIDE_RATES: usize = 10;

/// Guide rates as multiples of sidereal. The last two entries are placeholders for the rates tied
/// to the axis maximum (half-max and max), filled in per axis.
const GUIDE_LADDER: [f64; NUM_GUIDE_RATES] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 20.0, 48.0, 0.0, 0.0];

/// Index of the half-max guide rate.
pub const GUIDE_RATE_HALF_MAX: usize = 8;

/// Index of the max guide rate.
pub const GUIDE_RATE_MAX: usize = 9;

/// Sidereal rates below this are treated as stationary.
const MIN_MULTIPLE: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Rates for a single axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRates {
    /// Steps per degree of axis rotation.
    pub steps_per_degree: f64,

    /// Steps per sidereal second at the sidereal rate.
    pub steps_per_second: f64,

    /// Timer ticks per step at the sidereal rate, also used as the idle rate.
    pub sidereal_rate: u64,

    /// Timer ticks per step while taking up backlash or catching up with the target.
    pub takeup_rate: u64,

    /// Timer ticks per step at the maximum slew rate.
    pub max_rate: u64,

    /// Acceleration distance in steps, the distance over which a goto ramps from rest to
    /// `max_rate`.
    pub accel_steps: f64,

    /// Ramp constant, `max_rate * sqrt(accel_steps)`. The ramp rate at a distance `d` from rest
    /// is `ramp_c / sqrt(d)`.
    pub ramp_c: f64,

    /// Guide ladder for this axis, in sidereal multiples.
    pub guide_ladder: [f64; NUM_GUIDE_RATES],
}

/// Rates for all axes.
#[derive(Debug, Clone)]
pub struct RateTable {
    interval: u64,
    axes: [AxisRates; NUM_AXES],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("Invalid rate parameter for {0:?}: {1}")]
    InvalidParam(AxisId, &'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AxisRates {
    fn new(id: AxisId, params: &AxisParams, interval: u64) -> Result<Self, RateError> {
        if !(params.steps_per_degree > 0.0) {
            return Err(RateError::InvalidParam(id, "steps_per_degree must be positive"));
        }
        if !(params.max_slew_rate_dps > 0.0) {
            return Err(RateError::InvalidParam(id, "max_slew_rate_dps must be positive"));
        }
        if !(params.max_accel_dps2 > 0.0) {
            return Err(RateError::InvalidParam(id, "max_accel_dps2 must be positive"));
        }
        if !(params.takeup_multiple >= 1.0) {
            return Err(RateError::InvalidParam(id, "takeup_multiple must be at least 1"));
        }

        let steps_per_second = params.steps_per_degree / 240.0;

        let max_rate = (TIMER_TICKS_PER_S as f64
            / (params.max_slew_rate_dps * params.steps_per_degree))
            .round()
            .max(1.0) as u64;

        // Distance to reach max rate at constant acceleration, v^2 / 2a
        let accel_deg = params.max_slew_rate_dps.powi(2) / (2.0 * params.max_accel_dps2);
        let accel_steps = (accel_deg * params.steps_per_degree).max(1.0);

        let mut rates = Self {
            steps_per_degree: params.steps_per_degree,
            steps_per_second,
            sidereal_rate: 0,
            takeup_rate: 0,
            max_rate,
            accel_steps,
            ramp_c: max_rate as f64 * accel_steps.sqrt(),
            guide_ladder: GUIDE_LADDER,
        };
        rates.set_interval(interval, params.takeup_multiple);

        if rates.sidereal_rate <= rates.max_rate {
            return Err(RateError::InvalidParam(id, "max slew rate is below the sidereal rate"));
        }

        Ok(rates)
    }

    fn set_interval(&mut self, interval: u64, takeup_multiple: f64) {
        let sidereal = interval as f64 / self.steps_per_second;
        self.sidereal_rate = sidereal.round().max(1.0) as u64;
        self.takeup_rate = ((sidereal / takeup_multiple).round() as u64).max(self.max_rate);

        let max_multiple = sidereal / self.max_rate as f64;
        self.guide_ladder[GUIDE_RATE_HALF_MAX] = max_multiple / 2.0;
        self.guide_ladder[GUIDE_RATE_MAX] = max_multiple;
    }

    /// Timer rate for a sidereal multiple. Stationary requests get the idle (sidereal) rate,
    /// nothing is ever faster than the maximum rate.
    pub fn timer_rate(&self, multiple: f64) -> u64 {
        let m = multiple.abs();
        if m < MIN_MULTIPLE {
            return self.sidereal_rate;
        }
        let r = self.sidereal_rate as f64 / m;
        if r >= u64::MAX as f64 {
            self.sidereal_rate
        } else {
            (r.round() as u64).max(self.max_rate)
        }
    }

    /// Fixed point target advance per clock tick for a sidereal multiple.
    pub fn fstep(&self, multiple: f64) -> Fixed {
        Fixed::from_f64(multiple * self.steps_per_second / TICKS_PER_SECOND as f64)
    }

    /// Guide rate in sidereal multiples for a ladder index.
    pub fn guide_multiple(&self, index: usize) -> Option<f64> {
        self.guide_ladder.get(index).copied()
    }

    /// Ramp timer rate at a distance of `d` steps from rest.
    pub fn ramp_rate(&self, d: f64) -> u64 {
        (self.ramp_c / d.max(1.0).sqrt()).round() as u64
    }

    /// Steps needed to come to rest from a timer rate `rate`.
    pub fn stopping_distance(&self, rate: u64) -> f64 {
        if rate == 0 {
            return self.accel_steps;
        }
        let ratio = self.max_rate as f64 / rate as f64;
        (self.accel_steps * ratio * ratio).min(self.accel_steps)
    }
}

impl RateTable {
    /// Build the table from the axis parameters and the current clock interval.
    pub fn new(params: [&AxisParams; NUM_AXES], interval: u64) -> Result<Self, RateError> {
        Ok(Self {
            interval,
            axes: [
                AxisRates::new(AxisId::Axis1, params[0], interval)?,
                AxisRates::new(AxisId::Axis2, params[1], interval)?,
            ],
        })
    }

    pub fn axis(&self, id: AxisId) -> &AxisRates {
        &self.axes[id.index()]
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Follow a change of the corrected clock interval. Returns `true` if the table changed.
    pub fn set_interval(&mut self, interval: u64, takeup_multiples: [f64; NUM_AXES]) -> bool {
        if interval == self.interval {
            return false;
        }
        self.interval = interval;
        for (a, m) in self.axes.iter_mut().zip(takeup_multiples.iter()) {
            a.set_interval(interval, *m);
        }
        true
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> AxisParams {
        AxisParams {
            steps_per_degree: 1000.0,
            max_slew_rate_dps: 2.0,
            max_accel_dps2: 1.0,
            ..AxisParams::default()
        }
    }

    #[test]
    fn test_boot_rates() {
        let p = params();
        let t = RateTable::new([&p, &p], 15_956_313).unwrap();
        let a = t.axis(AxisId::Axis1);

        // 1000 steps/deg -> 4.1667 steps per sidereal second
        assert!((a.steps_per_second - 4.16667).abs() < 1e-4);
        assert_eq!(a.sidereal_rate, (15_956_313.0f64 / (1000.0 / 240.0)).round() as u64);
        assert_eq!(a.takeup_rate, (a.sidereal_rate as f64 / 4.0).round() as u64);

        // 2 deg/s at 1000 steps/deg = 2000 steps/s = 8000 timer ticks per step
        assert_eq!(a.max_rate, 8000);

        // v^2/2a = 2 deg = 2000 steps
        assert!((a.accel_steps - 2000.0).abs() < 1e-9);
        assert_eq!(a.ramp_rate(2000.0), 8000);
        assert_eq!(a.ramp_rate(0.0), a.ramp_rate(1.0));
    }

    #[test]
    fn test_timer_rate_limits() {
        let p = params();
        let t = RateTable::new([&p, &p], 15_956_313).unwrap();
        let a = t.axis(AxisId::Axis2);

        assert_eq!(a.timer_rate(0.0), a.sidereal_rate);
        assert_eq!(a.timer_rate(1.0), a.sidereal_rate);
        assert_eq!(a.timer_rate(-2.0), (a.sidereal_rate as f64 / 2.0).round() as u64);
        assert_eq!(a.timer_rate(1e9), a.max_rate);

        let max = a.guide_multiple(GUIDE_RATE_MAX).unwrap();
        assert_eq!(a.timer_rate(max), a.max_rate);
        assert!(a.guide_multiple(NUM_GUIDE_RATES).is_none());
    }

    #[test]
    fn test_stopping_distance() {
        let p = params();
        let t = RateTable::new([&p, &p], 15_956_313).unwrap();
        let a = t.axis(AxisId::Axis1);

        assert!((a.stopping_distance(a.max_rate) - a.accel_steps).abs() < 1e-9);
        // Half speed needs a quarter of the distance
        assert!((a.stopping_distance(a.max_rate * 2) - a.accel_steps / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params();
        p.steps_per_degree = 0.0;
        assert!(RateTable::new([&p, &p], 15_956_313).is_err());

        // Slower than sidereal at max
        let mut p = params();
        p.max_slew_rate_dps = 0.001;
        assert!(RateTable::new([&p, &p], 15_956_313).is_err());
    }
}
