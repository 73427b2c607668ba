//! Main loop half of the axis step engine

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::sync::Arc;

use super::{AxisError, AxisId, AxisParams, AxisShared, Ramp, RampPhase};
use crate::fixed::Fixed;
use crate::rate::AxisRates;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Axis control state owned by the main loop.
pub struct AxisCtrl {
    id: AxisId,
    shared: Arc<AxisShared>,
    rates: AxisRates,

    min_steps: i32,
    max_steps: i32,
    takeup_threshold: i64,
    divergence_tolerance: i64,

    /// Authoritative copy of the target, mirrored into `shared` on every change.
    target: Fixed,

    ramp: Option<Ramp>,
    phase: RampPhase,
    soft_limit: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AxisCtrl {
    pub fn new(id: AxisId, params: &AxisParams, rates: AxisRates, position: i32, backlash: u32) -> Self {
        let (min_steps, max_steps) = params.limits_steps();
        let shared = Arc::new(AxisShared::new(
            id,
            position,
            rates.sidereal_rate,
            rates.takeup_rate,
            backlash,
        ));

        Self {
            id,
            shared,
            rates,
            min_steps,
            max_steps,
            takeup_threshold: params.takeup_threshold_steps as i64,
            divergence_tolerance: params.divergence_tolerance_steps as i64,
            target: Fixed::from_steps(position),
            ramp: None,
            phase: RampPhase::None,
            soft_limit: false,
        }
    }

    /// Handle to the state shared with the axis interrupt.
    pub fn shared(&self) -> Arc<AxisShared> {
        self.shared.clone()
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn rates(&self) -> &AxisRates {
        &self.rates
    }

    /// Follow a rate table change (the clock interval moved).
    pub fn set_rates(&mut self, rates: AxisRates) {
        self.rates = rates;
        self.shared.set_takeup_rate(rates.takeup_rate);
    }

    pub fn position(&self) -> i32 {
        self.shared.position()
    }

    pub fn target(&self) -> Fixed {
        self.target
    }

    pub fn timer_rate(&self) -> u64 {
        self.shared.timer_rate()
    }

    pub fn phase(&self) -> RampPhase {
        self.phase
    }

    pub fn limits(&self) -> (i32, i32) {
        (self.min_steps, self.max_steps)
    }

    pub fn in_limits(&self, steps: i32) -> bool {
        steps >= self.min_steps && steps <= self.max_steps
    }

    /// True once a target has been clamped with the axis already at its limit.
    pub fn soft_limit(&self) -> bool {
        self.soft_limit
    }

    pub fn clear_soft_limit(&mut self) {
        self.soft_limit = false;
    }

    /// Set the target, clamped to the travel limits.
    ///
    /// If the requested target lies beyond a limit the axis is already at, the clamped target is
    /// still committed but `StoppedAtLimit` is returned and the soft limit flag raised.
    pub fn set_target(&mut self, target: Fixed) -> Result<(), AxisError> {
        let clamped = target.clamp_steps(self.min_steps, self.max_steps);
        self.target = clamped;
        self.shared.set_target(clamped);

        if clamped != target {
            let pos = self.position();
            let at_limit = (target.steps() > self.max_steps && pos >= self.max_steps)
                || (target.steps() < self.min_steps && pos <= self.min_steps);

            if at_limit {
                if !self.soft_limit {
                    warn!("{:?} stopped at travel limit ({} steps)", self.id, pos);
                }
                self.soft_limit = true;
                return Err(AxisError::StoppedAtLimit(self.id, pos));
            }
        }

        Ok(())
    }

    /// Advance the target by a (signed) fixed point amount, used for tracking and guiding.
    pub fn advance_target(&mut self, delta: Fixed) -> Result<(), AxisError> {
        if delta == Fixed::ZERO {
            return Ok(());
        }
        self.set_target(self.target + delta)
    }

    /// Stop dead: the target becomes the current position and any ramp is dropped.
    pub fn hold(&mut self) {
        let pos = self.position();
        self.target = Fixed::from_steps(pos);
        self.shared.set_target(self.target);
        self.ramp = None;
        self.phase = RampPhase::None;
    }

    pub fn distance_to_go(&self) -> i64 {
        self.target.steps() as i64 - self.position() as i64
    }

    pub fn at_target(&self, tolerance: u32) -> bool {
        self.distance_to_go().abs() <= tolerance as i64
    }

    /// Begin a ramped move to `target`.
    pub fn start_goto(&mut self, target: i32) -> Result<(), AxisError> {
        if self.fault() {
            return Err(AxisError::Fault(self.id));
        }
        self.set_target(Fixed::from_steps(target))?;
        self.ramp = Some(Ramp::new(self.position(), self.timer_rate(), &self.rates));
        debug!(
            "{:?} goto {} -> {} steps",
            self.id,
            self.position(),
            target
        );
        Ok(())
    }

    pub fn in_goto(&self) -> bool {
        self.ramp.is_some()
    }

    /// End the ramp, the axis falls back to the rate given to `update_rate`.
    pub fn finish_goto(&mut self) {
        self.ramp = None;
        self.phase = RampPhase::None;
    }

    /// Retarget a goto so that it comes to rest along the deceleration ramp from its current
    /// rate, rather than stopping dead.
    pub fn abort_goto(&mut self) {
        if self.ramp.is_none() {
            return;
        }

        let to_go = self.distance_to_go();
        if to_go == 0 {
            return;
        }

        let stop = self.rates.stopping_distance(self.timer_rate()).ceil() as i64;
        if stop >= to_go.abs() {
            return;
        }

        let pos = self.position() as i64;
        let new_target = pos + stop * to_go.signum();
        debug!("{:?} aborting, stopping at {} steps", self.id, new_target);

        // Stopping short of the old target cannot leave the travel range
        self.target = Fixed::from_steps(new_target as i32);
        self.shared.set_target(self.target);
    }

    /// Compute and push the timer rate for this pass.
    ///
    /// During a goto the ramp profile is used. Otherwise the rate follows `multiple` (the total
    /// sidereal multiple the target is being advanced at), dropping to the takeup rate when the
    /// axis has fallen behind its target.
    pub fn update_rate(&mut self, multiple: f64) -> u64 {
        let rate = match self.ramp {
            Some(ramp) => {
                let (r, p) = ramp.rate_at(self.position(), self.target.steps(), &self.rates);
                self.phase = p;
                r
            }
            None => {
                self.phase = RampPhase::None;
                let r = self.rates.timer_rate(multiple);
                if self.distance_to_go().abs() > self.takeup_threshold {
                    r.min(self.rates.takeup_rate)
                } else {
                    r
                }
            }
        };

        self.shared.set_timer_rate(rate);
        rate
    }

    /// Check a tracking axis has not fallen too far behind its target. On failure the axis
    /// fault is raised.
    pub fn check_divergence(&self) -> Result<(), AxisError> {
        let lag = self.distance_to_go();
        if self.divergence_tolerance > 0 && lag.abs() > self.divergence_tolerance {
            self.shared.raise_fault();
            return Err(AxisError::Diverged(self.id, lag));
        }
        Ok(())
    }

    pub fn fault(&self) -> bool {
        self.shared.fault()
    }

    /// Clear the fault after an explicit reset. The axis holds where it stopped.
    pub fn reset_fault(&mut self) {
        self.hold();
        self.shared.clear_fault();
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.hold();
        }
        self.shared.set_enabled(enabled);
    }

    pub fn backlash(&self) -> u32 {
        self.shared.backlash_steps()
    }

    pub fn set_backlash(&mut self, steps: u32) {
        self.shared.set_backlash_steps(steps);
    }

    /// Axis angle of the motor position, degrees.
    pub fn angle_deg(&self) -> f64 {
        self.position() as f64 / self.rates.steps_per_degree
    }

    /// Nearest step to an axis angle.
    pub fn steps_for_deg(&self, deg: f64) -> i32 {
        (deg * self.rates.steps_per_degree).round() as i32
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
