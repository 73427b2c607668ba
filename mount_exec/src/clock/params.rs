//! Parameters for the sidereal clock

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use super::DEFAULT_SIDEREAL_INTERVAL;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Sidereal clock parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockParams {

    // ---- INTERVAL ----

    /// Interval used when none has been stored.
    ///
    /// Units: timer ticks per sidereal second
    pub default_interval: u64,

    /// Lowest interval accepted by `set_interval`.
    ///
    /// Units: timer ticks per sidereal second
    pub min_interval: u64,

    /// Highest interval accepted by `set_interval`.
    ///
    /// Units: timer ticks per sidereal second
    pub max_interval: u64,

    // ---- PPS ----

    /// PPS periods further than this from one second are discarded.
    ///
    /// Units: microseconds
    pub pps_window_us: u32,

    /// Length of the exponential PPS average, the weight of a new sample is
    /// `1/pps_filter_len`.
    pub pps_filter_len: u32,

    /// Largest change of the applied PPS ratio per update.
    pub max_ratio_step: f64,

    /// Clock ticks between updates of the applied ratio.
    pub ratio_update_ticks: u32,

    /// Time without a PPS edge after which the fix is considered lost.
    ///
    /// Units: seconds
    pub pps_timeout_s: f64,
}

impl Default for ClockParams {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_SIDEREAL_INTERVAL,
            min_interval: DEFAULT_SIDEREAL_INTERVAL - DEFAULT_SIDEREAL_INTERVAL / 100,
            max_interval: DEFAULT_SIDEREAL_INTERVAL + DEFAULT_SIDEREAL_INTERVAL / 100,
            pps_window_us: 1000,
            pps_filter_len: 20,
            max_ratio_step: 2e-6,
            ratio_update_ticks: 100,
            pps_timeout_s: 3.0,
        }
    }
}
