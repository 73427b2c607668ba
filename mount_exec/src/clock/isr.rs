//! Interrupt half of the sidereal clock

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::TICKS_PER_SECOND;
use crate::hal::HwTimer;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State shared between the clock interrupt and the main loop.
///
/// Every field is a single atomic word with exactly one writer:
/// - `ticks`, `pps_sample`, `pps_last_edge_us`: interrupt.
/// - `corrected_interval`: main loop.
///
/// `pps_sample` packs the PPS sequence number (high half) with the matching period (low half) so
/// the pair is always read together.
#[derive(Debug)]
pub struct ClockShared {
    ticks: AtomicU32,
    corrected_interval: AtomicU64,
    pps_sample: AtomicU64,
    pps_last_edge_us: AtomicU32,
    pps_seen: AtomicBool,
}

/// The clock interrupt handler, advancing `ticks` and timestamping PPS edges.
pub struct ClockIsr<T: HwTimer> {
    shared: Arc<ClockShared>,
    timer: T,

    /// Remainder of `corrected_interval / TICKS_PER_SECOND` carried between firings so that a
    /// fractional tick period does not drift.
    remainder: u64,

    last_edge_us: Option<u32>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ClockShared {
    pub fn new(corrected_interval: u64) -> Self {
        Self {
            ticks: AtomicU32::new(0),
            corrected_interval: AtomicU64::new(corrected_interval),
            pps_sample: AtomicU64::new(0),
            pps_last_edge_us: AtomicU32::new(0),
            pps_seen: AtomicBool::new(false),
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn corrected_interval(&self) -> u64 {
        self.corrected_interval.load(Ordering::Acquire)
    }

    pub(crate) fn set_corrected_interval(&self, interval: u64) {
        self.corrected_interval.store(interval, Ordering::Release);
    }

    /// Sequence number and period of the latest PPS edge pair.
    pub fn pps(&self) -> (u32, u32) {
        unpack_sample(self.pps_sample.load(Ordering::Acquire))
    }

    /// Time of the last PPS edge, if one has ever been seen.
    pub fn pps_last_edge_us(&self) -> Option<u32> {
        if self.pps_seen.load(Ordering::Acquire) {
            Some(self.pps_last_edge_us.load(Ordering::Acquire))
        } else {
            None
        }
    }
}

impl<T: HwTimer> ClockIsr<T> {
    pub fn new(shared: Arc<ClockShared>, timer: T) -> Self {
        Self {
            shared,
            timer,
            remainder: 0,
            last_edge_us: None,
        }
    }

    /// Period until the next clock tick, in timer ticks.
    pub fn next_period(&self) -> u64 {
        (self.shared.corrected_interval() + self.remainder) / TICKS_PER_SECOND as u64
    }

    /// Timer interrupt: advance the clock by one tick and program the next firing.
    pub fn tick(&mut self) {
        // fetch_add wraps on overflow
        self.shared.ticks.fetch_add(1, Ordering::AcqRel);

        let total = self.shared.corrected_interval() + self.remainder;
        self.remainder = total % TICKS_PER_SECOND as u64;
        self.timer.program_next(total / TICKS_PER_SECOND as u64);
    }

    /// PPS edge interrupt, `now_us` read from the microsecond clock.
    pub fn pps_edge(&mut self, now_us: u32) {
        if let Some(last) = self.last_edge_us {
            let period = now_us.wrapping_sub(last);
            let (seq, _) = self.shared.pps();
            self.shared
                .pps_sample
                .store(pack_sample(seq.wrapping_add(1), period), Ordering::Release);
        }
        self.last_edge_us = Some(now_us);
        self.shared.pps_last_edge_us.store(now_us, Ordering::Release);
        self.shared.pps_seen.store(true, Ordering::Release);
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn pack_sample(seq: u32, period_us: u32) -> u64 {
    ((seq as u64) << 32) | period_us as u64
}

fn unpack_sample(sample: u64) -> (u32, u32) {
    ((sample >> 32) as u32, sample as u32)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct RecTimer(Vec<u64>);

    impl HwTimer for RecTimer {
        fn program_next(&mut self, interval_ticks: u64) {
            self.0.push(interval_ticks);
        }
    }

    #[test]
    fn test_fractional_period_does_not_drift() {
        let shared = Arc::new(ClockShared::new(15_956_313));
        let mut isr = ClockIsr::new(shared.clone(), RecTimer::default());

        for _ in 0..1000 {
            isr.tick();
        }

        // Ten sidereal seconds of periods sum to exactly ten intervals
        let total: u64 = isr.timer().0.iter().sum();
        assert_eq!(total, 10 * 15_956_313);
        assert_eq!(shared.ticks(), 1000);
    }

    #[test]
    fn test_pps_edges() {
        let shared = Arc::new(ClockShared::new(15_956_313));
        let mut isr = ClockIsr::new(shared.clone(), RecTimer::default());

        isr.pps_edge(u32::MAX - 100);
        assert_eq!(shared.pps().0, 0);

        isr.pps_edge(999_899);
        assert_eq!(shared.pps(), (1, 1_000_000));
        assert_eq!(shared.pps_last_edge_us(), Some(999_899));
    }

    #[test]
    fn test_pps_sample_is_one_word() {
        let shared = Arc::new(ClockShared::new(15_956_313));
        let mut isr = ClockIsr::new(shared.clone(), RecTimer::default());

        isr.pps_edge(0);
        isr.pps_edge(1_000_003);
        let first = shared.pps_sample.load(Ordering::Acquire);
        isr.pps_edge(1_999_999);

        // Each stored word carries its own period, a reader never pairs a sequence number with
        // the next edge's period
        assert_eq!(unpack_sample(first), (1, 1_000_003));
        assert_eq!(shared.pps(), (2, 999_996));

        assert_eq!(unpack_sample(pack_sample(u32::MAX, 7)), (u32::MAX, 7));
    }
}
