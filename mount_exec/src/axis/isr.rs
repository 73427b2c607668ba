//! Interrupt half of the axis step engine

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::AxisId;
use crate::fixed::Fixed;
use crate::hal::{Direction, HwTimer, StepDirPins};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Axis state shared between the interrupt and the main loop.
///
/// Each field is one atomic word with a single writer:
///
/// | Field                | Writer    |
/// |----------------------|-----------|
/// | `position`           | interrupt |
/// | `backlash_remaining` | interrupt |
/// | `forward`            | interrupt |
/// | `target`             | main loop |
/// | `timer_rate`         | main loop |
/// | `takeup_rate`        | main loop |
/// | `backlash_steps`     | main loop |
/// | `enabled`            | main loop |
///
/// `fault` is set by the interrupt (fault line) or the main loop (divergence) and cleared only by
/// the main loop on an explicit reset.
#[derive(Debug)]
pub struct AxisShared {
    id: AxisId,
    position: AtomicI32,
    target: AtomicI64,
    timer_rate: AtomicU64,
    takeup_rate: AtomicU64,
    backlash_steps: AtomicU32,
    backlash_remaining: AtomicI32,
    forward: AtomicBool,
    fault: AtomicBool,
    enabled: AtomicBool,
}

/// The axis timer interrupt handler.
pub struct AxisIsr<T: HwTimer, P: StepDirPins> {
    shared: Arc<AxisShared>,
    timer: T,
    pins: P,
    invert: bool,

    direction: Direction,

    /// Position within the backlash gap, `0` when fully taken up in reverse and `backlash` when
    /// fully taken up forward.
    backlash_pos: u32,
    backlash: u32,

    driver_enabled: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AxisShared {
    pub fn new(id: AxisId, position: i32, timer_rate: u64, takeup_rate: u64, backlash: u32) -> Self {
        Self {
            id,
            position: AtomicI32::new(position),
            target: AtomicI64::new(Fixed::from_steps(position).raw()),
            timer_rate: AtomicU64::new(timer_rate),
            takeup_rate: AtomicU64::new(takeup_rate),
            backlash_steps: AtomicU32::new(backlash),
            backlash_remaining: AtomicI32::new(0),
            forward: AtomicBool::new(true),
            fault: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn position(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }

    pub fn target(&self) -> Fixed {
        Fixed::from_raw(self.target.load(Ordering::Acquire))
    }

    pub fn timer_rate(&self) -> u64 {
        self.timer_rate.load(Ordering::Acquire)
    }

    pub fn takeup_rate(&self) -> u64 {
        self.takeup_rate.load(Ordering::Acquire)
    }

    pub fn backlash_steps(&self) -> u32 {
        self.backlash_steps.load(Ordering::Acquire)
    }

    pub fn backlash_remaining(&self) -> i32 {
        self.backlash_remaining.load(Ordering::Acquire)
    }

    pub fn direction(&self) -> Direction {
        match self.forward.load(Ordering::Acquire) {
            true => Direction::Forward,
            false => Direction::Reverse,
        }
    }

    pub fn fault(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_target(&self, target: Fixed) {
        self.target.store(target.raw(), Ordering::Release);
    }

    pub(crate) fn set_timer_rate(&self, rate: u64) {
        self.timer_rate.store(rate.max(1), Ordering::Release);
    }

    pub(crate) fn set_takeup_rate(&self, rate: u64) {
        self.takeup_rate.store(rate.max(1), Ordering::Release);
    }

    pub(crate) fn set_backlash_steps(&self, steps: u32) {
        self.backlash_steps.store(steps, Ordering::Release);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn raise_fault(&self) {
        self.fault.store(true, Ordering::Release);
    }

    pub(crate) fn clear_fault(&self) {
        self.fault.store(false, Ordering::Release);
    }
}

impl<T: HwTimer, P: StepDirPins> AxisIsr<T, P> {
    pub fn new(shared: Arc<AxisShared>, timer: T, pins: P, invert: bool) -> Self {
        let backlash = shared.backlash_steps();
        Self {
            shared,
            timer,
            pins,
            invert,
            direction: Direction::Forward,
            backlash_pos: backlash,
            backlash,
            driver_enabled: false,
        }
    }

    /// Timer interrupt. Emits at most one pulse and always programs the next firing.
    ///
    /// All work here is constant time: no floating point, no division.
    pub fn tick(&mut self) {
        if self.pins.fault_asserted() {
            self.shared.raise_fault();
        }

        let rate = self.shared.timer_rate();

        if self.shared.fault() || !self.shared.enabled() {
            if self.driver_enabled {
                self.pins.set_enabled(false);
                self.driver_enabled = false;
            }
            self.timer.program_next(rate);
            return;
        }
        if !self.driver_enabled {
            self.pins.set_enabled(true);
            self.driver_enabled = true;
        }

        let position = self.shared.position.load(Ordering::Relaxed);
        let target = self.shared.target().steps();

        let dir = match Direction::from_sign(target as i64 - position as i64) {
            Some(d) => d,
            None => {
                self.timer.program_next(rate);
                return;
            }
        };

        let remaining = self.start_backlash_aware_move(dir);

        if remaining > 0 {
            // Dead pulse: the motor turns but the load does not
            match dir {
                Direction::Forward => self.backlash_pos += 1,
                Direction::Reverse => self.backlash_pos -= 1,
            }
            self.shared
                .backlash_remaining
                .store(remaining as i32 - 1, Ordering::Release);
            self.pins.pulse();
            self.timer.program_next(rate.min(self.shared.takeup_rate()));
            return;
        }

        self.pins.pulse();
        self.shared
            .position
            .store(position + dir.sign(), Ordering::Release);
        self.timer.program_next(rate);
    }

    /// Prepare a step in `dir`, setting the direction line on a reversal. Returns the number of
    /// backlash steps still owed before the position may change.
    fn start_backlash_aware_move(&mut self, dir: Direction) -> u32 {
        let s = &self.shared;

        let backlash = s.backlash_steps();
        if backlash != self.backlash {
            // New setting: treat the gap as taken up in the current direction
            self.backlash = backlash;
            self.backlash_pos = match self.direction {
                Direction::Forward => backlash,
                Direction::Reverse => 0,
            };
        }

        if dir != self.direction {
            self.direction = dir;
            s.forward.store(dir == Direction::Forward, Ordering::Release);
            self.pins.set_direction(match self.invert {
                true => dir.reversed(),
                false => dir,
            });
        }

        let remaining = match dir {
            Direction::Forward => self.backlash - self.backlash_pos,
            Direction::Reverse => self.backlash_pos,
        };
        s.backlash_remaining.store(remaining as i32, Ordering::Release);

        remaining
    }

    pub fn shared(&self) -> &Arc<AxisShared> {
        &self.shared
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
