//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Number of microseconds in a second
pub const MICROS_PER_SECOND: u32 = 1_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Elapsed microseconds between two readings of a wrapping 32 bit
/// microsecond counter.
///
/// The counter rolls over roughly every 71 minutes, so readings are always
/// differenced with wrapping arithmetic and never compared directly.
pub fn micros_since(now_us: u32, then_us: u32) -> u32 {
    now_us.wrapping_sub(then_us)
}

/// Returns true if the wrapping microsecond reading `now_us` is at or past
/// `deadline_us`.
///
/// Valid as long as the two readings are less than half the counter range
/// apart.
pub fn micros_reached(now_us: u32, deadline_us: u32) -> bool {
    (now_us.wrapping_sub(deadline_us) as i32) >= 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_micros_wraparound() {
        assert_eq!(micros_since(5, u32::MAX - 4), 10);
        assert!(micros_reached(3, u32::MAX - 10));
        assert!(!micros_reached(u32::MAX - 10, 3));
        assert!(micros_reached(100, 100));
    }
}
