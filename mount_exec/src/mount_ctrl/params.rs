//! Parameters structure for MountCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    axis::AxisParams,
    clock::ClockParams,
    guide::GuideParams,
    pec::PecParams,
    rate::{Atmosphere, RateCompensation},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for mount control, loaded from `mount_ctrl.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountCtrlParams {

    // ---- SITE ----

    /// Units: degrees
    pub latitude_deg: f64,

    // ---- TRACKING ----

    pub rate_compensation: RateCompensation,

    /// Atmosphere used by the full compensation policies.
    pub atmosphere: Atmosphere,

    /// Time between tracking rate compensation updates.
    ///
    /// Units: seconds
    pub compensation_period_s: f64,

    /// Distance from a moving (tracking) target at which a goto counts as
    /// arrived.
    ///
    /// Units: steps
    pub arrival_tolerance_steps: u32,

    // ---- POLICY ----

    pub meridian_flip: MeridianFlip,

    /// Hold at the home position part way through a meridian flip until
    /// released.
    pub pause_home: bool,

    /// Disable the axis drivers once parked.
    pub disable_axes_on_park: bool,

    pub limits: LimitParams,

    // ---- SUBSYSTEMS ----

    pub clock: ClockParams,
    pub axis1: AxisParams,
    pub axis2: AxisParams,
    pub guide: GuideParams,
    pub pec: PecParams,
}

/// Pointing limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitParams {
    /// Units: degrees
    pub min_altitude_deg: f64,

    /// Units: degrees
    pub max_altitude_deg: f64,

    /// Hour angle east of the meridian down to which the west pier side may
    /// be used.
    ///
    /// Units: degrees
    pub degrees_past_meridian_e: f64,

    /// Hour angle west of the meridian up to which the east pier side may be
    /// used.
    ///
    /// Units: degrees
    pub degrees_past_meridian_w: f64,

    /// Largest hour angle the west pier side may track to.
    ///
    /// Units: degrees
    pub under_pole_deg: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Automatic meridian flip policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeridianFlip {
    /// Never flip, tracking halts at the meridian limit.
    Never,

    /// Gotos may pick either pier side but tracking never flips.
    Align,

    /// Flip automatically when the meridian limit is reached.
    Always,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for MeridianFlip {
    fn default() -> Self {
        MeridianFlip::Never
    }
}

impl Default for MountCtrlParams {
    fn default() -> Self {
        Self {
            latitude_deg: 51.5,
            rate_compensation: RateCompensation::default(),
            atmosphere: Atmosphere::default(),
            compensation_period_s: 10.0,
            arrival_tolerance_steps: 2,
            meridian_flip: MeridianFlip::default(),
            pause_home: false,
            disable_axes_on_park: true,
            limits: LimitParams::default(),
            clock: ClockParams::default(),
            axis1: AxisParams {
                min_deg: -200.0,
                max_deg: 200.0,
                ..AxisParams::default()
            },
            axis2: AxisParams {
                min_deg: -90.0,
                max_deg: 270.0,
                home_deg: 90.0,
                ..AxisParams::default()
            },
            guide: GuideParams::default(),
            pec: PecParams::default(),
        }
    }
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            min_altitude_deg: -10.0,
            max_altitude_deg: 90.0,
            degrees_past_meridian_e: 15.0,
            degrees_past_meridian_w: 15.0,
            under_pole_deg: 180.0,
        }
    }
}
