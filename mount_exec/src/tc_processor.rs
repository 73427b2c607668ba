//! # Telecommand processor module
//!
//! The telecommand processor executes [`MountCmd`]s coming from any source against the mount.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};

// Internal
use mount_lib::{
    cmd::MountCmd,
    mount_ctrl::{MountCtrl, MountError},
};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Execute a telecommand.
///
/// Rejected commands are logged and the error returned, the mount is left as it was.
pub(crate) fn exec(ctrl: &mut MountCtrl, cmd: &MountCmd) -> Result<(), MountError> {
    debug!("Received {:?} command", cmd);

    let result = match *cmd {
        MountCmd::StartTracking => ctrl.start_tracking(),
        MountCmd::StopTracking => {
            ctrl.stop_tracking();
            Ok(())
        }
        MountCmd::SetRateCompensation(c) => {
            ctrl.set_rate_compensation(c);
            Ok(())
        }
        MountCmd::SetAtmosphere(a) => {
            ctrl.set_atmosphere(a);
            Ok(())
        }
        MountCmd::GotoEquatorial { .. } | MountCmd::GotoAxes { .. } => match cmd.target() {
            Some(t) => ctrl.goto(t),
            None => Ok(()),
        },
        MountCmd::GoHome => ctrl.go_home(),
        MountCmd::Abort => {
            ctrl.abort();
            Ok(())
        }
        MountCmd::ContinueFlip => ctrl.continue_flip(),
        MountCmd::Sync { .. } => match cmd.target() {
            Some(t) => ctrl.sync(t),
            None => Ok(()),
        },
        MountCmd::SetPark => ctrl.set_park(),
        MountCmd::Park => ctrl.park(),
        MountCmd::Unpark => ctrl.unpark(),
        MountCmd::Guide {
            axis,
            dir,
            duration_ms,
        } => ctrl.guide(axis, dir, duration_ms),
        MountCmd::StopGuide(axis) => {
            ctrl.stop_guide(axis);
            Ok(())
        }
        MountCmd::SetGuideRate(i) => ctrl.set_guide_rate(i),
        MountCmd::SetPulseGuideRate(i) => ctrl.set_pulse_guide_rate(i),
        MountCmd::PecPlay => ctrl.pec_play(),
        MountCmd::PecRecord => ctrl.pec_record(),
        MountCmd::PecStop => {
            ctrl.pec_stop();
            Ok(())
        }
        MountCmd::PecClear => ctrl.pec_clear(),
        MountCmd::SetBacklash { axis, steps } => ctrl.set_backlash(axis, steps),
        MountCmd::SetSiderealInterval(v) => ctrl.set_sidereal_interval(v),
        MountCmd::AdjustSiderealInterval(d) => ctrl
            .adjust_sidereal_interval(d)
            .map(|v| info!("Sidereal interval now {}", v)),
        MountCmd::SetAxesEnabled(e) => ctrl.set_axes_enabled(e),
        MountCmd::ResetFault => {
            ctrl.reset_fault();
            Ok(())
        }
        MountCmd::ClearError => {
            ctrl.clear_error();
            Ok(())
        }
    };

    if let Err(ref e) = result {
        warn!("{:?} rejected: {}", cmd, e);
    }

    result
}
