//! Mount telemetry
//!
//! [`MountStatus`] is a flat snapshot of the mount, suitable for both JSON and CSV output.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::{FlipStage, GeneralError, GotoKind, ModeKind, ParkState, PierSide};
use crate::{axis::RampPhase, pec::PecStatus};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Snapshot of the mount state at the end of a main loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MountStatus {
    /// Sidereal clock ticks (centi-sidereal-seconds)
    pub ticks: u32,

    pub mode: ModeKind,
    pub goto_kind: Option<GotoKind>,
    pub park_state: ParkState,
    pub pier_side: PierSide,
    pub flip_stage: FlipStage,
    pub general_error: GeneralError,
    pub at_home: bool,

    // ---- POINTING ----

    /// Units: degrees
    pub axis1_deg: f64,

    /// Units: degrees
    pub axis2_deg: f64,

    /// Units: degrees
    pub ha_deg: f64,

    /// Units: degrees
    pub dec_deg: f64,

    /// Units: degrees
    pub alt_deg: f64,

    // ---- AXES ----

    pub axis1_steps: i32,
    pub axis2_steps: i32,
    pub axis1_target_steps: f64,
    pub axis2_target_steps: f64,

    /// Units: timer ticks per step
    pub axis1_rate: u64,

    /// Units: timer ticks per step
    pub axis2_rate: u64,

    pub axis1_phase: RampPhase,
    pub axis2_phase: RampPhase,
    pub axis1_fault: bool,
    pub axis2_fault: bool,
    pub axes_enabled: bool,

    // ---- RATES ----

    /// Tracking rate in sidereal multiples
    pub tracking_axis1: f64,

    /// Tracking rate in sidereal multiples
    pub tracking_axis2: f64,

    /// Guide contribution in sidereal multiples
    pub guide_axis1: f64,

    /// Guide contribution in sidereal multiples
    pub guide_axis2: f64,

    // ---- PEC ----

    pub pec_status: PecStatus,
    pub pec_index: usize,
    pub pec_recorded: bool,

    // ---- CLOCK ----

    /// Units: timer ticks per sidereal second
    pub sidereal_interval: u64,

    /// Units: timer ticks per sidereal second
    pub corrected_interval: u64,

    pub pps_ratio: f64,
    pub pps_locked: bool,

    // ---- WORKLOAD ----

    /// Units: microseconds
    pub pass_us: u32,

    /// Units: microseconds
    pub worst_pass_us: u32,

    /// Units: microseconds
    pub avg_pass_us: f64,
}

/// Archive of the mount telemetry to the session directory.
#[derive(Default)]
pub struct StatusArchive {
    latest: Option<MountStatus>,
    arch_status: Archiver,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StatusArchive {
    pub fn new(session: &Session) -> Result<Self, ArchiveError> {
        Ok(Self {
            latest: None,
            arch_status: Archiver::from_path(session, "mount_ctrl/status.csv")?,
        })
    }

    /// Set the snapshot written by the next call to `write`.
    pub fn update(&mut self, status: MountStatus) {
        self.latest = Some(status);
    }
}

impl Archived for StatusArchive {
    fn write(&mut self) -> Result<(), ArchiveError> {
        match self.latest.take() {
            Some(s) => self.arch_status.serialise(s),
            None => Ok(()),
        }
    }
}
