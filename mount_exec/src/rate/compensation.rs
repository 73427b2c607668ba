//! Tracking rate compensation for atmospheric refraction
//!
//! Refraction lifts objects near the horizon, and the lift changes as the object rises or sets,
//! so the apparent hour angle and declination do not move at exactly the sidereal rate. The rates
//! here are found by refracting the position half a minute of hour angle either side of the
//! current one and differencing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Half width of the differencing window in degrees of hour angle.
const HALF_WINDOW_DEG: f64 = 0.125;

/// Below this true altitude refraction is not modelled and the rates are sidereal.
const MIN_ALTITUDE_DEG: f64 = -1.0;

/// Limits on the compensated rates, keeping singular geometry (near the pole or zenith) from
/// producing wild rates.
const AXIS1_RANGE: (f64, f64) = (0.5, 1.5);
const AXIS2_RANGE: (f64, f64) = (-0.5, 0.5);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Ambient conditions for refraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    /// Units: millibar
    pub pressure_mbar: f64,

    /// Units: degrees Celsius
    pub temperature_c: f64,
}

/// Tracking rates in sidereal multiples.
///
/// `axis1` is the hour angle rate and `axis2` the declination rate (positive north).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingRates {
    pub axis1: f64,
    pub axis2: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Tracking rate compensation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateCompensation {
    /// Plain sidereal rate.
    None,

    /// Refraction at the standard atmosphere, hour angle axis only.
    RefrRa,

    /// Refraction at the standard atmosphere, both axes.
    RefrBoth,

    /// Refraction using the measured atmosphere, hour angle axis only.
    FullRa,

    /// Refraction using the measured atmosphere, both axes.
    FullBoth,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Atmosphere {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl Atmosphere {
    pub const STANDARD: Atmosphere = Atmosphere {
        pressure_mbar: 1010.0,
        temperature_c: 10.0,
    };

    fn scale(&self) -> f64 {
        (self.pressure_mbar / 1010.0) * (283.0 / (273.0 + self.temperature_c))
    }
}

impl Default for TrackingRates {
    fn default() -> Self {
        Self::SIDEREAL
    }
}

impl TrackingRates {
    pub const SIDEREAL: TrackingRates = TrackingRates {
        axis1: 1.0,
        axis2: 0.0,
    };
}

impl Default for RateCompensation {
    fn default() -> Self {
        RateCompensation::None
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the compensated tracking rates for a position.
///
/// # Inputs
/// - `mode`: compensation policy
/// - `ha_deg`, `dec_deg`: true hour angle and declination of the pointing
/// - `latitude_deg`: site latitude
/// - `atm`: measured atmosphere, only used by the `Full*` policies
pub fn compensate(
    mode: RateCompensation,
    ha_deg: f64,
    dec_deg: f64,
    latitude_deg: f64,
    atm: &Atmosphere,
) -> TrackingRates {
    let (scale, both) = match mode {
        RateCompensation::None => return TrackingRates::SIDEREAL,
        RateCompensation::RefrRa => (Atmosphere::STANDARD.scale(), false),
        RateCompensation::RefrBoth => (Atmosphere::STANDARD.scale(), true),
        RateCompensation::FullRa => (atm.scale(), false),
        RateCompensation::FullBoth => (atm.scale(), true),
    };

    let (alt, _) = equ_to_hor(ha_deg, dec_deg, latitude_deg);
    if alt < MIN_ALTITUDE_DEG {
        return TrackingRates::SIDEREAL;
    }

    let (ha0, dec0) = apparent(ha_deg - HALF_WINDOW_DEG, dec_deg, latitude_deg, scale);
    let (ha1, dec1) = apparent(ha_deg + HALF_WINDOW_DEG, dec_deg, latitude_deg, scale);

    let window = 2.0 * HALF_WINDOW_DEG;
    let mut dha = ha1 - ha0;
    if dha < -180.0 {
        dha += 360.0;
    } else if dha > 180.0 {
        dha -= 360.0;
    }

    let axis1 = util::maths::clamp(dha / window, AXIS1_RANGE.0, AXIS1_RANGE.1);
    let axis2 = match both {
        true => util::maths::clamp((dec1 - dec0) / window, AXIS2_RANGE.0, AXIS2_RANGE.1),
        false => 0.0,
    };

    TrackingRates { axis1, axis2 }
}

/// Refraction in degrees for a true altitude, Saemundsson's formula.
pub fn refraction_deg(alt_deg: f64, scale: f64) -> f64 {
    if alt_deg < MIN_ALTITUDE_DEG {
        return 0.0;
    }
    let arg = (alt_deg + 10.3 / (alt_deg + 5.11)).to_radians();
    scale * 1.02 / arg.tan() / 60.0
}

/// Convert hour angle and declination to altitude and azimuth (north = 0, east = 90), degrees.
pub fn equ_to_hor(ha_deg: f64, dec_deg: f64, latitude_deg: f64) -> (f64, f64) {
    let (h, d, p) = (ha_deg.to_radians(), dec_deg.to_radians(), latitude_deg.to_radians());

    let sin_alt = p.sin() * d.sin() + p.cos() * d.cos() * h.cos();
    let alt = sin_alt.max(-1.0).min(1.0).asin();
    let az = (-d.cos() * h.sin()).atan2(d.sin() * p.cos() - d.cos() * h.cos() * p.sin());

    (alt.to_degrees(), util::maths::rem_euclid(az.to_degrees(), 360.0))
}

/// Convert altitude and azimuth to hour angle and declination, degrees.
pub fn hor_to_equ(alt_deg: f64, az_deg: f64, latitude_deg: f64) -> (f64, f64) {
    let (a, z, p) = (alt_deg.to_radians(), az_deg.to_radians(), latitude_deg.to_radians());

    let sin_dec = p.sin() * a.sin() + p.cos() * a.cos() * z.cos();
    let dec = sin_dec.max(-1.0).min(1.0).asin();
    let ha = (-a.cos() * z.sin()).atan2(a.sin() * p.cos() - a.cos() * z.cos() * p.sin());

    (ha.to_degrees(), dec.to_degrees())
}

fn apparent(ha_deg: f64, dec_deg: f64, latitude_deg: f64, scale: f64) -> (f64, f64) {
    let (alt, az) = equ_to_hor(ha_deg, dec_deg, latitude_deg);
    hor_to_equ(alt + refraction_deg(alt, scale), az, latitude_deg)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
