//! # Mount library.
//!
//! Motion control core for an equatorial telescope mount. The executable, benches and tests
//! access the modules through this library.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Fixed point arithmetic for step positions and per-tick increments
pub mod fixed;

/// Hardware abstraction - step/dir pins and one-shot timers
pub mod hal;

/// Non-volatile key/value store for persistent settings
pub mod store;

/// Sidereal clock - drives the tick counter and disciplines it against a PPS signal
pub mod clock;

/// Rate table - maps sidereal multiples onto timer intervals, with refraction compensation
pub mod rate;

/// Axis control - step generation, backlash take-up and acceleration ramps
pub mod axis;

/// Guide blender - manual and pulse guiding on top of tracking
pub mod guide;

/// Periodic error correction - recording and playback synchronised to the worm
pub mod pec;

/// Mount control - tracking, gotos, parking and the meridian flip
pub mod mount_ctrl;

/// Simulated hardware which runs the interrupts and main loop in simulated time
pub mod sim;

/// Commands accepted by the mount
pub mod cmd;
