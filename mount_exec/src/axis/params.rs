//! Parameters structure for an axis

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for one mount axis.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxisParams {

    // ---- GEOMETRY ----

    /// Units: steps/degree
    pub steps_per_degree: f64,

    /// Lowest axis angle the mechanics allow.
    ///
    /// Units: degrees
    pub min_deg: f64,

    /// Highest axis angle the mechanics allow.
    ///
    /// Units: degrees
    pub max_deg: f64,

    /// Axis angle of the home position.
    ///
    /// Units: degrees
    pub home_deg: f64,

    /// Invert the direction line.
    pub reverse: bool,

    // ---- CAPABILITIES ----

    /// Units: degrees/second
    pub max_slew_rate_dps: f64,

    /// Units: degrees/second^2
    pub max_accel_dps2: f64,

    /// Backlash used when none is stored.
    ///
    /// Units: steps
    pub backlash_steps: u32,

    /// Rate of backlash takeup and catch-up moves as a multiple of sidereal.
    pub takeup_multiple: f64,

    // ---- TOLERANCES ----

    /// Lag beyond which a tracking axis runs at the takeup rate to catch up.
    ///
    /// Units: steps
    pub takeup_threshold_steps: u32,

    /// Lag beyond which a tracking axis is declared faulty. Zero disables the check.
    ///
    /// Units: steps
    pub divergence_tolerance_steps: u32,
}

impl Default for AxisParams {
    fn default() -> Self {
        Self {
            steps_per_degree: 12800.0,
            min_deg: -180.0,
            max_deg: 180.0,
            home_deg: 0.0,
            reverse: false,
            max_slew_rate_dps: 2.0,
            max_accel_dps2: 1.0,
            backlash_steps: 0,
            takeup_multiple: 4.0,
            takeup_threshold_steps: 16,
            divergence_tolerance_steps: 0,
        }
    }
}

impl AxisParams {
    /// Travel limits in steps.
    pub fn limits_steps(&self) -> (i32, i32) {
        (
            (self.min_deg * self.steps_per_degree).ceil() as i32,
            (self.max_deg * self.steps_per_degree).floor() as i32,
        )
    }
}
