//! # Fixed point step positions
//!
//! Tracking and guide rates are fractions of a step per clock tick, so axis
//! targets carry a sub-step accumulator. [`Fixed`] holds a signed step count
//! with [`FRAC_BITS`] fractional bits (a scale of 2^32 per step) in a single
//! `i64`, which keeps accumulation exact over arbitrarily long tracking
//! sessions and lets the value cross the ISR boundary as one atomic word.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of fractional bits.
pub const FRAC_BITS: u32 = 32;

/// Raw value of one whole step.
pub const ONE: i64 = 1 << FRAC_BITS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A step count with a 32 bit fractional part.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fixed(i64);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub const fn from_raw(raw: i64) -> Self {
        Fixed(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub const fn from_steps(steps: i32) -> Self {
        Fixed((steps as i64) << FRAC_BITS)
    }

    /// Convert from a floating point step count, rounding to the nearest
    /// representable value.
    pub fn from_f64(steps: f64) -> Self {
        Fixed((steps * ONE as f64).round() as i64)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / ONE as f64
    }

    /// The whole step part, rounded towards negative infinity.
    pub const fn steps(self) -> i32 {
        (self.0 >> FRAC_BITS) as i32
    }

    /// The fractional part as a count of 2^-32 steps.
    pub const fn frac(self) -> u32 {
        self.0 as u32
    }

    /// Clamp the whole step part into `[min, max]`. A clamped value loses its
    /// fractional part.
    pub fn clamp_steps(self, min: i32, max: i32) -> Self {
        if self.steps() < min {
            Fixed::from_steps(min)
        } else if self.steps() > max {
            Fixed::from_steps(max)
        } else {
            self
        }
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({} + {}/2^32)", self.steps(), self.frac())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

impl From<i32> for Fixed {
    fn from(steps: i32) -> Self {
        Fixed::from_steps(steps)
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Fixed) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Fixed) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Fixed {
        Fixed(self.0.wrapping_neg())
    }
}

/// Scale by a whole number of ticks.
impl Mul<i64> for Fixed {
    type Output = Fixed;

    fn mul(self, rhs: i64) -> Fixed {
        Fixed(self.0.wrapping_mul(rhs))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
