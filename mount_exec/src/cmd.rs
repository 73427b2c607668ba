//! Commands accepted by the mount
//!
//! `MountCmd` is the typed boundary between a command source (a script, or a protocol layer) and
//! [`MountCtrl`](crate::mount_ctrl::MountCtrl). Commands are serialised with serde's default
//! externally tagged representation, so a command without data is a plain string
//! (`"StartTracking"`) and one with data is a single-key object
//! (`{"SetBacklash": {"axis": "Axis2", "steps": 40}}`).

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    axis::AxisId,
    guide::GuideDir,
    mount_ctrl::{GotoTarget, PierSide},
    rate::{Atmosphere, RateCompensation},
};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A command to the mount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MountCmd {
    // ---- TRACKING ----
    StartTracking,
    StopTracking,
    SetRateCompensation(RateCompensation),
    SetAtmosphere(Atmosphere),

    // ---- MOTION ----
    /// Goto an hour angle and declination.
    ///
    /// Units: degrees
    GotoEquatorial {
        ha_deg: f64,
        dec_deg: f64,
        pier_side: Option<PierSide>,
    },

    /// Goto raw axis angles.
    ///
    /// Units: degrees
    GotoAxes { axis1_deg: f64, axis2_deg: f64 },

    GoHome,
    Abort,
    ContinueFlip,

    /// Declare the current pointing to be an hour angle and declination.
    Sync {
        ha_deg: f64,
        dec_deg: f64,
        pier_side: Option<PierSide>,
    },

    // ---- PARK ----
    SetPark,
    Park,
    Unpark,

    // ---- GUIDING ----
    /// Guide an axis, for `duration_ms` if given or until stopped.
    Guide {
        axis: AxisId,
        dir: GuideDir,
        duration_ms: Option<u32>,
    },

    /// Stop guiding one axis, or both.
    StopGuide(Option<AxisId>),
    SetGuideRate(usize),
    SetPulseGuideRate(usize),

    // ---- PEC ----
    PecPlay,
    PecRecord,
    PecStop,
    PecClear,

    // ---- SETTINGS ----
    /// Units: steps
    SetBacklash { axis: AxisId, steps: u32 },

    /// Units: timer ticks per sidereal second
    SetSiderealInterval(u64),

    /// Units: timer ticks per sidereal second
    AdjustSiderealInterval(i64),

    SetAxesEnabled(bool),
    ResetFault,
    ClearError,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MountCmd {
    /// Target of a goto or sync command.
    pub fn target(&self) -> Option<GotoTarget> {
        match *self {
            MountCmd::GotoEquatorial {
                ha_deg,
                dec_deg,
                pier_side,
            }
            | MountCmd::Sync {
                ha_deg,
                dec_deg,
                pier_side,
            } => Some(GotoTarget::Equatorial {
                ha_deg,
                dec_deg,
                pier_side,
            }),
            MountCmd::GotoAxes {
                axis1_deg,
                axis2_deg,
            } => Some(GotoTarget::Axes {
                axis1_deg,
                axis2_deg,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let cmd: MountCmd = serde_json::from_str("\"StartTracking\"").unwrap();
        assert_eq!(cmd, MountCmd::StartTracking);

        let cmd: MountCmd = serde_json::from_str(
            r#"{"Guide": {"axis": "Axis1", "dir": "Forward", "duration_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            MountCmd::Guide {
                axis: AxisId::Axis1,
                dir: GuideDir::Forward,
                duration_ms: Some(500)
            }
        );

        let cmd: MountCmd =
            serde_json::from_str(r#"{"GotoEquatorial": {"ha_deg": -30.0, "dec_deg": 20.0}}"#)
                .unwrap();
        assert_eq!(
            cmd.target(),
            Some(GotoTarget::Equatorial {
                ha_deg: -30.0,
                dec_deg: 20.0,
                pier_side: None
            })
        );
    }
}
