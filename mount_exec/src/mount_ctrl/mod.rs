//! # Mount control module
//!
//! [`MountCtrl`] is the top level arbiter of the mount. It owns the main loop halves of the
//! sidereal clock and both axes, the rate table, guide blender and PEC engine, and decides which
//! rate each axis runs at. The mount is in one of the modes:
//!
//! - `Off` - Not tracking, axes idle at their targets.
//! - `Sidereal` - Axis targets advance at the (compensated) sidereal rate plus any guide and PEC
//!   terms.
//! - `MoveTo` - A ramped goto is in progress. On arrival the mode captured at the start of the
//!   goto is restored.
//!
//! Guiding is an overlay on `Off` and `Sidereal`, parking and meridian flips are driven through
//! `MoveTo`. Commands are validated synchronously and rejected with a [`MountError`], conditions
//! found while running (faults, limits) are latched in a sticky [`GeneralError`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod meridian;
mod params;
mod park;
mod state;
pub mod tm;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use meridian::{FlipStage, PierSide};
pub use params::{LimitParams, MeridianFlip, MountCtrlParams};
pub use park::{ParkPosition, ParkState};
pub use state::{GotoTarget, InputData, MountCtrl, MountInit, StatusReport};
pub use tm::{MountStatus, StatusArchive};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    axis::AxisError, clock::ClockError, fixed::Fixed, guide::GuideError, pec::PecError,
    rate::RateError, store::StoreError,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Tracking mode of the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Off,
    Sidereal,
    MoveTo {
        target_axis1: Fixed,
        target_axis2: Fixed,
    },
}

/// Payload free version of [`Mode`] for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeKind {
    Off,
    Sidereal,
    MoveTo,
}

/// What a `MoveTo` is for, determining what happens on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GotoKind {
    Target,
    Park,
    Home,
    FlipHome,
    Flip,
}

/// Latched error conditions, cleared by the command that resolves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneralError {
    None,
    MotorFault,
    AltMin,
    AltMax,
    Meridian,
    UnderPole,
    Sync,
    Park,
    LimitSense,
}

/// Errors rejecting a mount command, or failing initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Target is below the horizon limit")]
    BelowHorizon,

    #[error("Target is above the overhead limit")]
    AboveOverhead,

    #[error("Target is outside the mount's limits")]
    OutsideLimits,

    #[error("A goto is already in progress")]
    GotoInProgress,

    #[error("The mount is parked")]
    Parked,

    #[error("The mount is not parked")]
    NotParked,

    #[error("No park position has been set")]
    NoParkPositionSet,

    #[error("Park failed")]
    ParkFailed,

    #[error("Motor fault, reset required")]
    MotorFault,

    #[error("The mount is in motion")]
    MountInMotion,

    #[error("Already guiding in the opposite direction")]
    AlreadyGuiding,

    #[error("Sync rejected while the mount is moving or parked")]
    Sync,

    #[error("No meridian flip is waiting at home")]
    NoFlipWaiting,

    #[error("PEC error: {0}")]
    Pec(#[from] PecError),

    #[error("Axis error: {0}")]
    Axis(#[from] AxisError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Guide error: {0}")]
    Guide(GuideError),

    #[error("Rate table error: {0}")]
    Rate(#[from] RateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Off => ModeKind::Off,
            Mode::Sidereal => ModeKind::Sidereal,
            Mode::MoveTo { .. } => ModeKind::MoveTo,
        }
    }

    pub fn is_move_to(&self) -> bool {
        matches!(self, Mode::MoveTo { .. })
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Off
    }
}

impl Default for GeneralError {
    fn default() -> Self {
        GeneralError::None
    }
}

impl GeneralError {
    /// Errors which halt tracking and are cleared by restarting it.
    pub fn is_tracking_limit(self) -> bool {
        matches!(
            self,
            GeneralError::AltMin
                | GeneralError::AltMax
                | GeneralError::Meridian
                | GeneralError::UnderPole
                | GeneralError::LimitSense
        )
    }
}

impl From<GuideError> for MountError {
    fn from(e: GuideError) -> Self {
        match e {
            GuideError::AlreadyGuiding(_) => MountError::AlreadyGuiding,
            e => MountError::Guide(e),
        }
    }
}
