//! Parking

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{FlipStage, GeneralError, GotoKind, Mode, MountCtrl, MountError};
use crate::{
    axis::AxisId,
    store::{self, KEY_PARK_POSITION, KEY_PARK_STATUS},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParkState {
    NotParked,
    Parking,
    Parked,
    ParkFailed,

    /// Power was lost part way through a park, the position cannot be trusted.
    ParkUnknown,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Saved park position, in synced axis steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkPosition {
    pub axis1_steps: i32,
    pub axis2_steps: i32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ParkState {
    fn default() -> Self {
        ParkState::NotParked
    }
}

impl ParkState {
    /// State to resume in after a restart with this state stored.
    pub fn on_boot(self) -> Self {
        match self {
            ParkState::Parking => ParkState::ParkUnknown,
            s => s,
        }
    }
}

impl MountCtrl {
    /// Save the current (stationary) pointing as the park position.
    pub fn set_park(&mut self) -> Result<(), MountError> {
        if self.park_state == ParkState::Parked {
            return Err(MountError::Parked);
        }
        if self.mode.is_move_to() {
            return Err(MountError::MountInMotion);
        }

        let pos = ParkPosition {
            axis1_steps: self.index_steps(AxisId::Axis1),
            axis2_steps: self.index_steps(AxisId::Axis2),
        };
        store::save(self.store.as_mut(), KEY_PARK_POSITION, &pos)?;
        self.park_position = Some(pos);

        info!(
            "Park position set to ({}, {}) steps",
            pos.axis1_steps, pos.axis2_steps
        );
        Ok(())
    }

    /// Move to the park position. On arrival tracking is off and, if configured, the axes are
    /// disabled.
    pub fn park(&mut self) -> Result<(), MountError> {
        match self.park_state {
            ParkState::Parked => {
                info!("Already parked");
                return Ok(());
            }
            ParkState::Parking => return Err(MountError::GotoInProgress),
            _ => (),
        }

        let pos = self.park_position.ok_or(MountError::NoParkPositionSet)?;

        if self.faulted() {
            return Err(MountError::MotorFault);
        }
        if self.mode.is_move_to() {
            return Err(MountError::GotoInProgress);
        }

        let steps = [
            pos.axis1_steps - self.sync_offset[0],
            pos.axis2_steps - self.sync_offset[1],
        ];
        if !self.axes[0].in_limits(steps[0]) || !self.axes[1].in_limits(steps[1]) {
            return Err(MountError::OutsideLimits);
        }

        self.flip = FlipStage::Idle;
        self.start_move(GotoKind::Park, steps)?;
        self.last_mode = Mode::Off;
        self.set_park_state(ParkState::Parking)?;

        info!("Parking");
        Ok(())
    }

    /// Leave the park position, re-enabling the axes. Tracking stays off.
    pub fn unpark(&mut self) -> Result<(), MountError> {
        if self.park_state != ParkState::Parked {
            return Err(MountError::NotParked);
        }

        for axis in self.axes.iter_mut() {
            axis.set_enabled(true);
        }
        self.set_park_state(ParkState::NotParked)?;

        if self.general_error == GeneralError::Park {
            self.general_error = GeneralError::None;
        }
        info!("Unparked");
        Ok(())
    }

    pub fn park_state(&self) -> ParkState {
        self.park_state
    }

    pub fn park_position(&self) -> Option<ParkPosition> {
        self.park_position
    }

    /// Park move arrived.
    pub(crate) fn park_arrived(&mut self, aborted: bool) {
        self.mode = Mode::Off;

        if aborted {
            info!("Park aborted");
            self.persist_park_state(ParkState::NotParked);
            return;
        }

        if self.params.disable_axes_on_park {
            for axis in self.axes.iter_mut() {
                axis.set_enabled(false);
            }
        }
        self.persist_park_state(ParkState::Parked);
        info!("Parked");
    }

    /// A fault or limit stopped the park. There is no retry.
    pub(crate) fn park_failed(&mut self) {
        error!("Park failed");
        self.general_error = GeneralError::Park;
        self.persist_park_state(ParkState::ParkFailed);
    }

    fn set_park_state(&mut self, state: ParkState) -> Result<(), MountError> {
        self.park_state = state;
        store::save(self.store.as_mut(), KEY_PARK_STATUS, &state)?;
        Ok(())
    }

    /// As `set_park_state` but from the main loop, where a store failure is only reported.
    fn persist_park_state(&mut self, state: ParkState) {
        if let Err(e) = self.set_park_state(state) {
            warn!("Could not save the park state: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_interrupted_park_is_unknown_on_boot() {
        assert_eq!(ParkState::Parking.on_boot(), ParkState::ParkUnknown);
        assert_eq!(ParkState::Parked.on_boot(), ParkState::Parked);
        assert_eq!(ParkState::NotParked.on_boot(), ParkState::NotParked);
    }
}
