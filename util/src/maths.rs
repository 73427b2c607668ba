//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T 
where
    T: PartialOrd
{
    if value > max {
        max
    }
    else if value < min {
        min
    }
    else {
        value
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle in degrees into the range `[-180, 180)`.
pub fn wrap_180<T>(angle_deg: T) -> T
where
    T: Float
{
    let half = T::from(180.0).unwrap();
    rem_euclid(angle_deg + half, half + half) - half
}

/// Move `current` towards `target` by no more than `max_step`.
pub fn step_towards<T>(current: T, target: T, max_step: T) -> T
where
    T: Float
{
    let delta = clamp(target - current, -max_step.abs(), max_step.abs());
    current + delta
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_180() {
        assert_eq!(wrap_180(0f64), 0f64);
        assert_eq!(wrap_180(190f64), -170f64);
        assert_eq!(wrap_180(-190f64), 170f64);
        assert_eq!(wrap_180(180f64), -180f64);
        assert_eq!(wrap_180(540f64), -180f64);
    }

    #[test]
    fn test_step_towards() {
        assert_eq!(step_towards(1.0f64, 2.0, 0.25), 1.25);
        assert_eq!(step_towards(1.0f64, 0.0, 0.25), 0.75);
        assert_eq!(step_towards(1.0f64, 1.1, 0.25), 1.1);
    }
}
