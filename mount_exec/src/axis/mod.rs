//! # Axis step engine
//!
//! Each axis is split across the two tasks of the controller:
//!
//! - [`AxisIsr`] runs in the axis timer interrupt. It is the only writer of the step position and
//!   emits at most one step pulse per firing, handling backlash takeup and direction changes.
//! - [`AxisCtrl`] runs in the main loop. It is the only writer of the target and the timer rate,
//!   and computes acceleration ramps so that the interrupt only ever reads precomputed values.
//!
//! The two halves communicate exclusively through [`AxisShared`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod ctrl;
mod isr;
mod params;
mod ramp;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use ctrl::AxisCtrl;
pub use isr::{AxisIsr, AxisShared};
pub use params::AxisParams;
pub use ramp::{Ramp, RampPhase};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of controlled axes.
pub const NUM_AXES: usize = 2;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Identifies a mount axis. Axis 1 is the hour angle (or azimuth) axis, axis 2 the declination
/// (or altitude) axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisId {
    Axis1,
    Axis2,
}

#[derive(Debug, thiserror::Error)]
pub enum AxisError {
    #[error("{0:?} is stopped at its travel limit ({1} steps)")]
    StoppedAtLimit(AxisId, i32),

    #[error("{0:?} driver fault")]
    Fault(AxisId),

    #[error("{0:?} position diverged from target by {1} steps")]
    Diverged(AxisId, i64),
}

impl AxisId {
    pub const ALL: [AxisId; NUM_AXES] = [AxisId::Axis1, AxisId::Axis2];

    pub fn index(self) -> usize {
        match self {
            AxisId::Axis1 => 0,
            AxisId::Axis2 => 1,
        }
    }
}
