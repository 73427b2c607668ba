//! Pier side geometry and the meridian flip
//!
//! Axis angles map onto the sky as follows. With axis 2 at or below 90 degrees the telescope is
//! on the east side of the pier and `HA = a1`, `Dec = a2`. Above 90 degrees it is on the west
//! side and `HA = a1 + 180`, `Dec = 180 - a2`. A flip mirrors a pointing from one side to the
//! other: `a1' = a1 - 180`, `a2' = 180 - a2`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{GeneralError, GotoKind, LimitParams, MeridianFlip, Mode, MountCtrl, StatusReport};
use crate::{axis::AxisId, clock::ticks_since};
use util::maths::wrap_180;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Clock ticks (centi-sidereal-seconds) per degree of hour angle.
const TICKS_PER_HA_DEG: f64 = 24_000.0;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
}

/// Progress of a meridian flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipStage {
    Idle,

    /// Moving to the home position before crossing over.
    ToHome,

    /// Holding at home until the flip is continued.
    WaitingHome,

    /// Moving to the mirrored target on the west side.
    ToTarget,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pointing being carried across the meridian, the hour angle is taken at `ticks`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlipPointing {
    pub ha_deg: f64,
    pub dec_deg: f64,
    pub ticks: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for FlipStage {
    fn default() -> Self {
        FlipStage::Idle
    }
}

impl PierSide {
    pub fn from_axis2_deg(axis2_deg: f64) -> Self {
        if axis2_deg <= 90.0 {
            PierSide::East
        } else {
            PierSide::West
        }
    }

    /// Sign relating a declination rate to an axis 2 rate.
    pub fn axis2_sign(self) -> f64 {
        match self {
            PierSide::East => 1.0,
            PierSide::West => -1.0,
        }
    }

    /// Preferred side for an hour angle when none is requested.
    pub fn for_hour_angle(ha_deg: f64) -> Self {
        if ha_deg < 0.0 {
            PierSide::East
        } else {
            PierSide::West
        }
    }

    pub fn other(self) -> Self {
        match self {
            PierSide::East => PierSide::West,
            PierSide::West => PierSide::East,
        }
    }

    /// Whether an hour angle may be reached (and tracked) from this side.
    pub fn allows(self, ha_deg: f64, limits: &LimitParams) -> bool {
        match self {
            PierSide::East => ha_deg <= limits.degrees_past_meridian_w,
            PierSide::West => {
                ha_deg >= -limits.degrees_past_meridian_e && ha_deg <= limits.under_pole_deg
            }
        }
    }
}

impl FlipPointing {
    /// Hour angle of the pointing at a later clock tick.
    pub fn ha_at(&self, ticks: u32) -> f64 {
        wrap_180(self.ha_deg + ticks_since(ticks, self.ticks) as f64 / TICKS_PER_HA_DEG)
    }
}

impl MountCtrl {
    /// Check the tracking pointing against the meridian limits, flipping or halting as the
    /// policy requires.
    pub(crate) fn check_meridian(&mut self, ha_deg: f64, dec_deg: f64, report: &mut StatusReport) {
        let side = self.pier_side();
        if side.allows(ha_deg, &self.params.limits) {
            return;
        }

        match (side, self.params.meridian_flip) {
            (PierSide::East, MeridianFlip::Always) => self.start_flip(ha_deg, dec_deg, report),
            (PierSide::East, _) => self.halt_tracking(GeneralError::Meridian, report),
            (PierSide::West, _) => self.halt_tracking(GeneralError::UnderPole, report),
        }
    }

    fn start_flip(&mut self, ha_deg: f64, dec_deg: f64, report: &mut StatusReport) {
        let pointing = FlipPointing {
            ha_deg,
            dec_deg,
            ticks: self.clock.ticks(),
        };

        let (kind, stage, steps) = match self.params.pause_home {
            true => (GotoKind::FlipHome, FlipStage::ToHome, Some(self.home_steps())),
            false => (GotoKind::Flip, FlipStage::ToTarget, self.flip_steps(&pointing)),
        };

        let steps = match steps {
            Some(s) => s,
            None => {
                warn!("Mirrored pointing is outside the axis limits, cannot flip");
                self.halt_tracking(GeneralError::Meridian, report);
                return;
            }
        };

        info!(
            "Meridian flip at HA {:.3} deg, Dec {:.3} deg",
            ha_deg, dec_deg
        );

        match self.start_move(kind, steps) {
            Ok(()) => {
                self.last_mode = Mode::Sidereal;
                self.flip = stage;
                self.flip_pointing = Some(pointing);
                report.flip_started = true;
            }
            Err(e) => {
                warn!("Meridian flip failed to start: {}", e);
                self.halt_tracking(GeneralError::Meridian, report);
            }
        }
    }

    /// Motor targets for the flip pointing now, on the west side.
    pub(crate) fn flip_steps(&self, pointing: &FlipPointing) -> Option<[i32; 2]> {
        let ha = pointing.ha_at(self.clock.ticks());
        let (a1, a2) = equ_to_axes(ha, pointing.dec_deg, PierSide::West);
        self.motor_steps(a1, a2)
    }

    /// Release a flip held at home.
    pub fn continue_flip(&mut self) -> Result<(), super::MountError> {
        if self.flip != FlipStage::WaitingHome {
            return Err(super::MountError::NoFlipWaiting);
        }

        let steps = match self.flip_pointing.and_then(|p| self.flip_steps(&p)) {
            Some(s) => s,
            None => {
                self.flip = FlipStage::Idle;
                self.general_error = GeneralError::Meridian;
                return Err(super::MountError::OutsideLimits);
            }
        };

        self.start_move(GotoKind::Flip, steps)?;
        self.last_mode = Mode::Sidereal;
        self.flip = FlipStage::ToTarget;
        info!("Meridian flip continuing from home");
        Ok(())
    }

    /// Called when a flip stage's move arrives.
    pub(crate) fn flip_arrived(&mut self, kind: GotoKind, aborted: bool) {
        if aborted {
            warn!("Meridian flip aborted, tracking stopped");
            self.flip = FlipStage::Idle;
            self.flip_pointing = None;
            self.general_error = GeneralError::Meridian;
            self.mode = Mode::Off;
            return;
        }

        match kind {
            // Tracking was stopped on the way home
            GotoKind::FlipHome if self.last_mode != Mode::Sidereal => {
                info!("Meridian flip cancelled at home");
                self.flip = FlipStage::Idle;
                self.flip_pointing = None;
                self.mode = Mode::Off;
            }
            GotoKind::FlipHome => {
                info!("Meridian flip waiting at home");
                self.flip = FlipStage::WaitingHome;
                self.mode = Mode::Off;
            }
            _ => {
                info!("Meridian flip complete, now on the {:?} side", self.pier_side());
                self.flip = FlipStage::Idle;
                self.flip_pointing = None;
                self.mode = self.last_mode;
            }
        }
    }

    /// Pier side the mount is on, from the axis 2 target.
    pub fn pier_side(&self) -> PierSide {
        PierSide::from_axis2_deg(self.target_deg(AxisId::Axis2))
    }

    pub fn flip_stage(&self) -> FlipStage {
        self.flip
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Hour angle and declination for a pair of axis angles.
pub fn axes_to_equ(axis1_deg: f64, axis2_deg: f64) -> (f64, f64) {
    match PierSide::from_axis2_deg(axis2_deg) {
        PierSide::East => (wrap_180(axis1_deg), axis2_deg),
        PierSide::West => (wrap_180(axis1_deg + 180.0), 180.0 - axis2_deg),
    }
}

/// Axis angles reaching an hour angle and declination from a pier side.
pub fn equ_to_axes(ha_deg: f64, dec_deg: f64, side: PierSide) -> (f64, f64) {
    match side {
        PierSide::East => (ha_deg, dec_deg),
        PierSide::West => (ha_deg - 180.0, 180.0 - dec_deg),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pier_side_geometry() {
        assert_eq!(PierSide::from_axis2_deg(90.0), PierSide::East);
        assert_eq!(PierSide::from_axis2_deg(90.1), PierSide::West);

        let (ha, dec) = axes_to_equ(-30.0, 20.0);
        assert_eq!((ha, dec), (-30.0, 20.0));

        // Mirroring gives the same sky position
        let (a1, a2) = equ_to_axes(10.0, 20.0, PierSide::West);
        assert_eq!((a1, a2), (-170.0, 160.0));
        let (ha, dec) = axes_to_equ(a1, a2);
        assert!((ha - 10.0).abs() < 1e-9);
        assert!((dec - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_side_limits() {
        let limits = LimitParams::default();
        assert!(PierSide::East.allows(15.0, &limits));
        assert!(!PierSide::East.allows(15.1, &limits));
        assert!(PierSide::West.allows(-15.0, &limits));
        assert!(!PierSide::West.allows(-15.1, &limits));
        assert_eq!(PierSide::for_hour_angle(-0.1), PierSide::East);
        assert_eq!(PierSide::for_hour_angle(0.0), PierSide::West);
    }

    #[test]
    fn test_flip_pointing_ha_advances() {
        let p = FlipPointing {
            ha_deg: 15.0,
            dec_deg: 0.0,
            ticks: u32::MAX - 11_999,
        };
        // Half a degree later, across the tick counter wrap
        assert!((p.ha_at(0) - 15.5).abs() < 1e-9);
    }
}
