//! # Guide blender
//!
//! Holds at most one active guide per axis and turns it into a signed sidereal multiple which the
//! mount controller adds to the axis tracking rate. Pulse guides (with a duration) run at the
//! pulse guide rate, continuous guides (ST4 or manual, until stopped) at the guide rate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::axis::{AxisId, NUM_AXES};
use crate::rate::{RateTable, NUM_GUIDE_RATES};
use util::time::micros_reached;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Ladder index of the 1x sidereal guide rate.
pub const GUIDE_RATE_1X: usize = 2;

/// Default ladder index for continuous guiding (20x).
pub const DEFAULT_GUIDE_RATE: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Guide blender parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuideParams {
    /// Ladder index used for continuous guides when none is stored.
    pub guide_rate: usize,

    /// Ladder index used for pulse guides when none is stored.
    pub pulse_guide_rate: usize,

    /// Longest accepted pulse guide.
    ///
    /// Units: milliseconds
    pub max_pulse_ms: u32,
}

/// An active guide on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActiveGuide {
    pub dir: GuideDir,

    /// Ladder index of the rate.
    pub rate: usize,

    /// Rate in sidereal multiples, unsigned.
    pub multiple: f64,

    /// Expiry time for pulse guides.
    pub deadline_us: Option<u32>,
}

/// The guide blender.
#[derive(Debug, Clone)]
pub struct GuideBlender {
    ladders: [[f64; NUM_GUIDE_RATES]; NUM_AXES],
    guide_rate: usize,
    pulse_guide_rate: usize,
    max_pulse_ms: u32,
    active: [Option<ActiveGuide>; NUM_AXES],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Axis relative guide direction. On axis 1 forward is west, on axis 2 forward is north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideDir {
    Forward,
    Reverse,
}

#[derive(Debug, thiserror::Error)]
pub enum GuideError {
    #[error("{0:?} is already guiding in the opposite direction")]
    AlreadyGuiding(AxisId),

    #[error("Guide rate index {0} is not in the ladder")]
    InvalidRate(usize),

    #[error("Pulse guide of {0} ms is longer than the maximum of {1} ms")]
    PulseTooLong(u32, u32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GuideParams {
    fn default() -> Self {
        Self {
            guide_rate: DEFAULT_GUIDE_RATE,
            pulse_guide_rate: GUIDE_RATE_1X,
            max_pulse_ms: 16_399,
        }
    }
}

impl GuideDir {
    pub fn sign(self) -> f64 {
        match self {
            GuideDir::Forward => 1.0,
            GuideDir::Reverse => -1.0,
        }
    }
}

impl GuideBlender {
    pub fn new(params: &GuideParams, rates: &RateTable) -> Result<Self, GuideError> {
        let mut g = Self {
            ladders: [
                rates.axis(AxisId::Axis1).guide_ladder,
                rates.axis(AxisId::Axis2).guide_ladder,
            ],
            guide_rate: GUIDE_RATE_1X,
            pulse_guide_rate: GUIDE_RATE_1X,
            max_pulse_ms: params.max_pulse_ms,
            active: [None; NUM_AXES],
        };
        g.set_guide_rate(params.guide_rate)?;
        g.set_pulse_guide_rate(params.pulse_guide_rate)?;
        Ok(g)
    }

    /// Follow a rate table change, the max based ladder entries depend on the clock interval.
    pub fn set_rates(&mut self, rates: &RateTable) {
        for id in AxisId::ALL.iter() {
            self.ladders[id.index()] = rates.axis(*id).guide_ladder;
        }
    }

    pub fn guide_rate(&self) -> usize {
        self.guide_rate
    }

    pub fn pulse_guide_rate(&self) -> usize {
        self.pulse_guide_rate
    }

    pub fn set_guide_rate(&mut self, index: usize) -> Result<(), GuideError> {
        if index >= NUM_GUIDE_RATES {
            return Err(GuideError::InvalidRate(index));
        }
        self.guide_rate = index;
        Ok(())
    }

    pub fn set_pulse_guide_rate(&mut self, index: usize) -> Result<(), GuideError> {
        if index >= NUM_GUIDE_RATES {
            return Err(GuideError::InvalidRate(index));
        }
        self.pulse_guide_rate = index;
        Ok(())
    }

    /// Start a guide.
    ///
    /// A `duration_ms` makes this a pulse guide which expires on its own, otherwise the guide
    /// runs until [`GuideBlender::stop`]. A guide in the opposite direction on an axis which is
    /// already guiding is rejected and leaves the active guide untouched, the same direction
    /// re-arms it.
    pub fn start(
        &mut self,
        axis: AxisId,
        dir: GuideDir,
        duration_ms: Option<u32>,
        now_us: u32,
    ) -> Result<(), GuideError> {
        if let Some(active) = self.active[axis.index()] {
            if active.dir != dir {
                return Err(GuideError::AlreadyGuiding(axis));
            }
        }

        let rate = match duration_ms {
            Some(ms) if ms > self.max_pulse_ms => {
                return Err(GuideError::PulseTooLong(ms, self.max_pulse_ms))
            }
            Some(_) => self.pulse_guide_rate,
            None => self.guide_rate,
        };

        let guide = ActiveGuide {
            dir,
            rate,
            multiple: self.ladders[axis.index()][rate],
            deadline_us: duration_ms.map(|ms| now_us.wrapping_add(ms.saturating_mul(1000))),
        };
        debug!("{:?} guiding {:?} at {}x", axis, dir, guide.multiple);

        self.active[axis.index()] = Some(guide);
        Ok(())
    }

    pub fn stop(&mut self, axis: AxisId) {
        if self.active[axis.index()].take().is_some() {
            debug!("{:?} guide stopped", axis);
        }
    }

    pub fn stop_all(&mut self) {
        for id in AxisId::ALL.iter() {
            self.stop(*id);
        }
    }

    /// Expire pulse guides whose duration has elapsed.
    pub fn service(&mut self, now_us: u32) {
        for (i, slot) in self.active.iter_mut().enumerate() {
            let expired = match slot {
                Some(ActiveGuide {
                    deadline_us: Some(d),
                    ..
                }) => micros_reached(now_us, *d),
                _ => false,
            };
            if expired {
                *slot = None;
                info!("{:?} pulse guide complete", AxisId::ALL[i]);
            }
        }
    }

    pub fn active(&self, axis: AxisId) -> Option<ActiveGuide> {
        self.active[axis.index()]
    }

    pub fn is_guiding(&self) -> bool {
        self.active.iter().any(Option::is_some)
    }

    /// Signed guide contribution for an axis in sidereal multiples.
    pub fn contribution(&self, axis: AxisId) -> f64 {
        match self.active[axis.index()] {
            Some(g) => g.dir.sign() * g.multiple,
            None => 0.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::axis::AxisParams;

    fn blender() -> GuideBlender {
        let p = AxisParams {
            steps_per_degree: 1000.0,
            ..AxisParams::default()
        };
        let rates = RateTable::new([&p, &p], 15_956_313).unwrap();
        GuideBlender::new(&GuideParams::default(), &rates).unwrap()
    }

    #[test]
    fn test_opposite_direction_rejected() {
        let mut g = blender();

        g.start(AxisId::Axis1, GuideDir::Forward, None, 0).unwrap();
        let before = g.active(AxisId::Axis1);

        match g.start(AxisId::Axis1, GuideDir::Reverse, None, 10) {
            Err(GuideError::AlreadyGuiding(AxisId::Axis1)) => (),
            r => panic!("expected AlreadyGuiding, got {:?}", r),
        }
        assert_eq!(g.active(AxisId::Axis1), before);
        assert_eq!(g.contribution(AxisId::Axis1), 20.0);

        // Other axis is independent
        g.start(AxisId::Axis2, GuideDir::Reverse, None, 10).unwrap();
        assert_eq!(g.contribution(AxisId::Axis2), -20.0);
    }

    #[test]
    fn test_pulse_expiry_is_atomic() {
        let mut g = blender();
        g.start(AxisId::Axis2, GuideDir::Forward, Some(500), 1_000).unwrap();
        assert_eq!(g.contribution(AxisId::Axis2), 1.0);

        g.service(500_999);
        assert_eq!(g.contribution(AxisId::Axis2), 1.0);

        g.service(501_000);
        assert_eq!(g.active(AxisId::Axis2), None);
        assert_eq!(g.contribution(AxisId::Axis2), 0.0);
        assert!(!g.is_guiding());
    }

    #[test]
    fn test_same_direction_rearms() {
        let mut g = blender();
        g.start(AxisId::Axis1, GuideDir::Reverse, Some(100), u32::MAX - 50_000)
            .unwrap();
        g.start(AxisId::Axis1, GuideDir::Reverse, Some(100), u32::MAX - 10_000)
            .unwrap();

        // First deadline has passed (across the counter wrap) but the re-armed one has not
        g.service(60_000);
        assert!(g.is_guiding());
        g.service(90_000);
        assert!(!g.is_guiding());
    }

    #[test]
    fn test_rates() {
        let mut g = blender();
        assert!(g.set_guide_rate(NUM_GUIDE_RATES).is_err());
        g.set_guide_rate(0).unwrap();
        g.start(AxisId::Axis1, GuideDir::Forward, None, 0).unwrap();
        assert_eq!(g.contribution(AxisId::Axis1), 0.25);

        assert!(g.start(AxisId::Axis2, GuideDir::Forward, Some(60_000), 0).is_err());
    }
}
