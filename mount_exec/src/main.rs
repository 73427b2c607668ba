//! Main mount executable entry point.
//!
//! # Architecture
//!
//! The executable runs the mount control core against simulated hardware:
//!
//!     - Initialise the session, logging and parameters
//!     - Open the settings store and build the mount from it
//!     - Main loop:
//!         - Telecommand processing from the script
//!         - Run the interrupts and mount control passes for one cycle of simulated time
//!         - Report tracking halts, flips and completed gotos
//!         - Archive telemetry
//!
//! # Modules
//!
//! All modules (e.g. `mount_ctrl`) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use mount_lib::{
    cmd::MountCmd,
    mount_ctrl::{MountCtrl, MountCtrlParams, MountInit, StatusArchive},
    sim::Simulator,
    store::JsonFileStore,
};

mod params;
mod tc_processor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::env;

// Internal
use params::MountExecParams;
use util::{
    archive::Archived,
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    raise_error,
    script_interpreter::{PendingCmds, ScriptInterpreter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Script run when none is given on the command line, relative to the software root.
const DEFAULT_SCRIPT: &str = "scripts/demo.mts";

/// Environment variable selecting the log file level.
const LOG_LEVEL_VAR: &str = "MOUNT_LOG";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mount_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger, the file level can be raised with MOUNT_LOG=debug
    let log_level = match env::var(LOG_LEVEL_VAR) {
        Ok(v) => v
            .parse::<LevelFilter>()
            .wrap_err_with(|| format!("Invalid {} level {:?}", LOG_LEVEL_VAR, v))?,
        Err(_) => LevelFilter::Info,
    };
    logger_init(log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mount Control Executable\n");
    info!("Running on: {}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: MountExecParams =
        util::params::load("mount_exec.toml").wrap_err("Could not load exec params")?;
    let ctrl_params: MountCtrlParams =
        util::params::load("mount_ctrl.toml").wrap_err("Could not load mount control params")?;

    info!("Exec parameters loaded");

    if exec_params.cycle_period_s <= 0.0 {
        raise_error!(
            "Cycle period must be positive, got {} s",
            exec_params.cycle_period_s
        );
    }

    // ---- INITIALISE TC SOURCE ----

    let sw_root = host::get_sw_root().wrap_err("The software root is not set")?;

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    // A single argument is the script path, otherwise run the demo script
    let script_path = match args.len() {
        1 => sw_root.join(DEFAULT_SCRIPT),
        2 => args[1].clone().into(),
        _ => raise_error!(
            "Expected zero or one argument (the script path), found {}",
            args.len() - 1
        ),
    };

    info!("Loading script from {:?}", script_path);

    let mut script: ScriptInterpreter<MountCmd> =
        ScriptInterpreter::new(&script_path).wrap_err("Failed to load script")?;

    info!(
        "Loaded script lasting {:.02} s containing {} commands\n",
        script.get_duration(),
        script.get_num_cmds()
    );

    // ---- MODULE INITIALISATION ----

    let store_path = sw_root.join(&exec_params.store_file);
    let store = JsonFileStore::open(&store_path)
        .wrap_err_with(|| format!("Failed to open the settings store at {:?}", store_path))?;

    let ctrl = MountCtrl::init(MountInit {
        params: ctrl_params,
        store: Box::new(store),
    })
    .wrap_err("Failed to initialise MountCtrl")?;

    info!(
        "MountCtrl init complete, park state {:?}\n",
        ctrl.park_state()
    );

    let mut sim = Simulator::new(ctrl);
    if let Some(drift) = exec_params.pps_drift_ppm {
        info!("Simulating a PPS source with {} ppm drift", drift);
        sim.enable_pps(drift);
    }

    let mut status_archive =
        StatusArchive::new(&session).wrap_err("Failed to create the status archive")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut settle_until: Option<f64> = None;

    loop {
        // ---- TELECOMMAND PROCESSING ----

        match script.get_pending_cmds_at(sim.now_s()) {
            PendingCmds::None => (),
            PendingCmds::Some(cmds) => {
                for cmd in cmds.iter() {
                    // Rejections are already logged, the mount carries on as it was
                    tc_processor::exec(sim.ctrl_mut(), cmd).ok();
                }
            }
            PendingCmds::EndOfScript => {
                if settle_until.is_none() {
                    info!("End of script reached");
                    settle_until = Some(sim.now_s() + exec_params.settle_time_s);
                }
            }
        }

        if let Some(t) = settle_until {
            if sim.now_s() >= t {
                break;
            }
        }

        // ---- MOUNT PROCESSING ----

        let log_before = sim.log().clone();

        sim.run_for(exec_params.cycle_period_s)
            .wrap_err("Mount control processing failed")?;

        let log = sim.log();
        for halt in log.halts.iter().skip(log_before.halts.len()) {
            warn!("Tracking halted: {:?}", halt);
        }
        if log.flips_started > log_before.flips_started {
            info!("Meridian flip started at {:.02} s", sim.now_s());
        }
        if log.gotos_completed > log_before.gotos_completed {
            info!("Goto completed at {:.02} s", sim.now_s());
            session.save_with_timestamp("mount_ctrl/goto_complete.json", *sim.status());
        }

        // ---- WRITE ARCHIVES ----

        status_archive.update(*sim.status());
        if let Err(e) = status_archive.write() {
            warn!("Could not archive the mount status: {}", e);
        }
    }

    // ---- SHUTDOWN ----

    let status = *sim.status();
    info!(
        "Final pointing: HA {:.04} deg, Dec {:.04} deg, mode {:?}",
        status.ha_deg, status.dec_deg, status.mode
    );
    session.save("mount_ctrl/final_status.json", status);

    info!("End of execution");

    session.exit();

    Ok(())
}
