//! Parameters for periodic error correction

use serde::Deserialize;

/// PEC parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PecParams {
    /// Axis 1 steps per worm rotation.
    pub worm_rotation_steps: u32,

    /// Largest number of table entries (one per sidereal second of worm rotation).
    pub capacity: usize,

    /// Whether a worm index sensor is fitted.
    pub sense_fitted: bool,

    /// Time after an index pulse during which further pulses are ignored.
    ///
    /// Units: seconds
    pub index_guard_s: f64,
}

impl Default for PecParams {
    fn default() -> Self {
        Self {
            worm_rotation_steps: 19200,
            capacity: 824,
            sense_fitted: false,
            index_guard_s: 30.0,
        }
    }
}
