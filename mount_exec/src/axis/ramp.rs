//! Goto acceleration ramp
//!
//! A constant acceleration profile expressed in step periods: at a distance `d` steps from rest
//! the speed is `v_max * sqrt(d / D)`, where `D` is the acceleration distance, so the timer rate
//! is `C / sqrt(d)` with `C = max_rate * sqrt(D)`. The profile is evaluated in the main loop on
//! the distance from the start (accelerating) or the distance to go (decelerating), whichever is
//! smaller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use crate::rate::AxisRates;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Ramp state of one goto.
#[derive(Debug, Clone, Copy)]
pub struct Ramp {
    start: i32,

    /// Slowest rate of the ramp. The ramp never runs slower than the rate the axis was moving at
    /// when it started, nor slower than the ramp constant.
    slow_rate: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RampPhase {
    /// No goto in progress.
    None,
    Accelerate,
    Cruise,
    Decelerate,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RampPhase {
    fn default() -> Self {
        RampPhase::None
    }
}

impl Ramp {
    pub fn new(start: i32, start_rate: u64, rates: &AxisRates) -> Self {
        Self {
            start,
            slow_rate: start_rate.min(rates.ramp_c.round() as u64).max(rates.max_rate),
        }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    /// Timer rate and phase at `position` heading for `end`.
    pub fn rate_at(&self, position: i32, end: i32, rates: &AxisRates) -> (u64, RampPhase) {
        let from_start = (position as i64 - self.start as i64).abs() as f64;
        let to_go = (end as i64 - position as i64).abs() as f64;

        let (d, ramping) = match from_start < to_go {
            true => (from_start, RampPhase::Accelerate),
            false => (to_go, RampPhase::Decelerate),
        };

        let rate = util::maths::clamp(rates.ramp_rate(d), rates.max_rate, self.slow_rate);

        let phase = match rate <= rates.max_rate && d >= rates.accel_steps {
            true => RampPhase::Cruise,
            false => ramping,
        };

        (rate, phase)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
