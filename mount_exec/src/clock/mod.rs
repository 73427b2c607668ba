//! # Sidereal clock
//!
//! The sidereal clock is a free running counter of centi-sidereal-seconds advanced by its own
//! hardware timer interrupt ([`ClockIsr`]). The main loop half ([`SiderealClock`]) owns the
//! calibrated interval, filters PPS edge periods from a GPS receiver and pushes the corrected
//! interval to the interrupt through [`ClockShared`].
//!
//! Units:
//! - `interval`: hardware timer ticks (1/16 us) per sidereal second.
//! - `ticks`: centi-sidereal-seconds, `u32`, wrapping.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod isr;
mod params;
mod pps;
mod state;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use isr::{ClockIsr, ClockShared};
pub use params::ClockParams;
pub use pps::PpsFilter;
pub use state::{ClockStatus, SiderealClock};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Nominal number of timer ticks per sidereal second.
pub const DEFAULT_SIDEREAL_INTERVAL: u64 = 15_956_313;

/// Clock ticks per sidereal second.
pub const TICKS_PER_SECOND: u32 = 100;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("Sidereal interval {0} is outside the accepted range [{1}, {2}]")]
    IntervalOutOfRange(u64, u64, u64),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Number of clock ticks from `earlier` to `later`, tolerating counter rollover.
pub fn ticks_since(later: u32, earlier: u32) -> u32 {
    later.wrapping_sub(earlier)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ticks_since_rollover() {
        assert_eq!(ticks_since(5, u32::MAX - 4), 10);
        assert_eq!(ticks_since(100, 40), 60);
    }
}
