//! Logger set up for the mount executables
//!
//! Records go to the terminal and to the session log file. The terminal only ever shows `INFO`
//! and above in colour, the log file keeps everything down to the requested level in plain text.
//! Modules that log on every main loop pass or every simulator step are capped so that a `DEBUG`
//! session stays readable.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info};
use std::fmt;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Most verbose level allowed for targets that log every pass.
const TARGET_CAPS: &[(&str, LevelFilter)] = &[
    // One record per simulated step
    ("mount_lib::sim", LevelFilter::Info),
    // Pass status and compensated rates
    ("mount_lib::mount_ctrl::state", LevelFilter::Debug),
    ("mount_lib::clock", LevelFilter::Debug),
];

/// Crate prefixes dropped from targets in `DEBUG` and `TRACE` records.
const TARGET_PREFIXES: &[&str] = &["mount_lib::", "mount_exec::"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// # Notes
///
/// - `min_level` must be at least as verbose as `log::Level::Info`, warnings
///   alone hide mode changes.
/// - `min_level` only applies to the log file, the terminal stops at `INFO`.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: self::LevelFilter,
    session: &session::Session,
) -> Result<(), LoggerInitError> {
    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let terminal = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, true))
        .level(LevelFilter::Info)
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, false))
        .chain(log_file);

    let mut dispatch = fern::Dispatch::new().level(min_level);
    for (target, level) in TARGET_CAPS.iter() {
        dispatch = dispatch.level_for(*target, capped(min_level, *level));
    }

    dispatch
        .chain(terminal)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Write one record, with its (shortened) target when below `INFO`.
fn format_record(
    out: fern::FormatCallback,
    message: &fmt::Arguments,
    record: &log::Record,
    colour: bool,
) {
    let tag = level_tag(record.level());
    let coloured;
    let level: &dyn fmt::Display = match colour {
        true => {
            coloured = colour_tag(record.level(), tag);
            &coloured
        }
        false => &tag,
    };

    if record.level() > log::Level::Info {
        out.finish(format_args!(
            "[{:10.6} {}] {}: {}",
            session::get_elapsed_seconds(),
            level,
            short_target(record.target()),
            message
        ))
    } else {
        out.finish(format_args!(
            "[{:10.6} {}] {}",
            session::get_elapsed_seconds(),
            level,
            message
        ))
    }
}

/// The less verbose of the session level and a target's cap.
fn capped(min_level: LevelFilter, cap: LevelFilter) -> LevelFilter {
    min_level.min(cap)
}

fn short_target(target: &str) -> &str {
    TARGET_PREFIXES
        .iter()
        .find_map(|p| target.strip_prefix(p))
        .unwrap_or(target)
}

fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRC",
        log::Level::Debug => "DBG",
        log::Level::Info => "INF",
        log::Level::Warn => "WRN",
        log::Level::Error => "ERR",
    }
}

fn colour_tag(level: log::Level, tag: &str) -> ColoredString {
    match level {
        log::Level::Trace => tag.dimmed().italic(),
        log::Level::Debug => tag.dimmed(),
        log::Level::Info => tag.normal(),
        log::Level::Warn => tag.yellow(),
        log::Level::Error => tag.red().bold(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_caps_only_quieten() {
        assert_eq!(capped(LevelFilter::Trace, LevelFilter::Info), LevelFilter::Info);
        assert_eq!(capped(LevelFilter::Debug, LevelFilter::Debug), LevelFilter::Debug);
        // A cap never makes a target louder than the session
        assert_eq!(capped(LevelFilter::Info, LevelFilter::Debug), LevelFilter::Info);
    }

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("mount_lib::axis::ctrl"), "axis::ctrl");
        assert_eq!(short_target("mount_exec::tc_processor"), "tc_processor");
        assert_eq!(short_target("util::session"), "util::session");
    }

    #[test]
    fn test_sim_capped_below_debug() {
        let (_, cap) = TARGET_CAPS
            .iter()
            .find(|(t, _)| *t == "mount_lib::sim")
            .unwrap();
        assert!(capped(LevelFilter::Trace, *cap) < LevelFilter::Debug);
    }
}
