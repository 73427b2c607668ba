//! # Hardware collaborator interfaces
//!
//! The motion core never touches registers or pins directly. Boards (and the
//! simulator in [`crate::sim`]) implement these traits.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Hardware timer ticks per microsecond (a 16 MHz timer clock).
pub const TIMER_TICKS_PER_US: u64 = 16;

/// Hardware timer ticks per second.
pub const TIMER_TICKS_PER_S: u64 = TIMER_TICKS_PER_US * 1_000_000;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Monotonic microsecond clock, wrapping at `u32::MAX`.
pub trait MicrosClock {
    fn micros(&self) -> u32;
}

/// A hardware timer which fires a callback after a programmed interval.
pub trait HwTimer {
    /// Program the interval until the next firing, in timer ticks.
    fn program_next(&mut self, interval_ticks: u64);
}

/// Step/direction lines of one stepper driver.
pub trait StepDirPins {
    /// Set the direction line. Implementations respect the driver's
    /// direction setup time.
    fn set_direction(&mut self, dir: Direction);

    /// Emit one step pulse of at least the driver's minimum width.
    fn pulse(&mut self);

    /// State of the driver's fault line.
    fn fault_asserted(&self) -> bool {
        false
    }

    /// Enable or disable the driver (holding torque).
    fn set_enabled(&mut self, enabled: bool);
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Stepping direction of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Direction {
    /// +1 for forward, -1 for reverse.
    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            s if s > 0 => Some(Direction::Forward),
            s if s < 0 => Some(Direction::Reverse),
            _ => None,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}
