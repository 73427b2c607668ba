//! # Mount Executable Parameters
//!
//! This module provide parameters for the mount executable itself, the controller's own
//! parameters are in `mount_ctrl.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MountExecParams {
    /// Path of the settings store, relative to the software root
    pub store_file: String,

    /// Simulated time run between command and telemetry checks.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Simulated time to run for once the script has ended.
    ///
    /// Units: seconds
    pub settle_time_s: f64,

    /// Drift of the simulated local oscillator against the PPS source, `None` runs without PPS.
    ///
    /// Units: parts per million
    pub pps_drift_ppm: Option<f64>,
}

impl Default for MountExecParams {
    fn default() -> Self {
        Self {
            store_file: "mount_store.json".into(),
            cycle_period_s: 0.1,
            settle_time_s: 5.0,
            pps_drift_ppm: None,
        }
    }
}
