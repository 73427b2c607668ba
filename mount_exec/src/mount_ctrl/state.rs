//! Implementations for the MountCtrl state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};

use super::{
    meridian::{axes_to_equ, equ_to_axes, FlipPointing},
    FlipStage, GeneralError, GotoKind, Mode, MountCtrlParams, MountError, MountStatus, ParkPosition,
    ParkState, PierSide,
};
use crate::{
    axis::{AxisCtrl, AxisId, AxisShared, NUM_AXES},
    clock::{ticks_since, ClockShared, SiderealClock, TICKS_PER_SECOND},
    guide::{GuideBlender, GuideDir, GuideParams},
    pec::{PecEngine, PecEvent},
    rate::{compensate, equ_to_hor, Atmosphere, RateCompensation, RateTable, TrackingRates},
    store::{
        self, NvStore, KEY_BACKLASH_AXIS1, KEY_BACKLASH_AXIS2, KEY_GUIDE_RATE, KEY_PARK_POSITION,
        KEY_PARK_STATUS, KEY_PEC_RECORDED, KEY_PEC_TABLE, KEY_PULSE_GUIDE_RATE,
        KEY_SIDEREAL_INTERVAL,
    },
};
use util::module::State;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Weight of a new sample in the average pass time.
const WORKLOAD_FILTER: f64 = 1.0 / 64.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Mount control module state
pub struct MountCtrl {
    pub(crate) params: MountCtrlParams,
    pub(crate) store: Box<dyn NvStore>,

    pub(crate) clock: SiderealClock,
    pub(crate) rates: RateTable,
    pub(crate) axes: [AxisCtrl; NUM_AXES],
    pub(crate) guide: GuideBlender,
    pub(crate) pec: PecEngine,

    pub(crate) mode: Mode,

    /// Mode restored when a `MoveTo` ends, only ever `Off` or `Sidereal`.
    pub(crate) last_mode: Mode,
    pub(crate) goto_kind: Option<GotoKind>,
    pub(crate) abort_requested: bool,

    pub(crate) park_state: ParkState,
    pub(crate) park_position: Option<ParkPosition>,

    pub(crate) flip: FlipStage,
    pub(crate) flip_pointing: Option<FlipPointing>,

    /// Offset from motor steps to synced axis steps.
    pub(crate) sync_offset: [i32; NUM_AXES],

    pub(crate) general_error: GeneralError,
    fault_handled: bool,

    tracking: TrackingRates,
    compensation_due: bool,
    last_compensation_ticks: u32,

    last_ticks: u32,
    now_us: u32,

    workload: Workload,
}

/// Initialisation data for MountCtrl.
pub struct MountInit {
    pub params: MountCtrlParams,

    /// Persistent store, settings saved in it override the parameters.
    pub store: Box<dyn NvStore>,
}

/// Input data to MountCtrl.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputData {
    /// Microsecond clock reading at the start of the pass.
    pub now_us: u32,

    /// The worm index sensor has triggered since the last pass.
    pub worm_sense: bool,
}

/// Events raised during a MountCtrl pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    pub goto_completed: bool,
    pub flip_started: bool,
    pub tracking_halted: Option<GeneralError>,
    pub pec_event: Option<PecEvent>,
    pub pec_incomplete: bool,
}

/// Target of a goto or sync.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GotoTarget {
    /// Raw axis angles.
    Axes { axis1_deg: f64, axis2_deg: f64 },

    /// Hour angle and declination. Without a pier side a goto picks one from the hour angle, a
    /// sync keeps the current side.
    Equatorial {
        ha_deg: f64,
        dec_deg: f64,
        pier_side: Option<PierSide>,
    },
}

/// Main loop pass time statistics.
#[derive(Debug, Clone, Copy, Default)]
struct Workload {
    last_us: u32,
    worst_us: u32,
    avg_us: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl State for MountCtrl {
    type InitData = MountInit;
    type InitError = MountError;

    type InputData = InputData;
    type OutputData = MountStatus;
    type StatusReport = StatusReport;
    type ProcError = MountError;

    /// Build the mount from its parameters and whatever was saved in the store.
    fn init(init_data: Self::InitData) -> Result<Self, Self::InitError> {
        let MountInit { params, mut store } = init_data;

        let stored_interval = stored(store.as_ref(), KEY_SIDEREAL_INTERVAL);
        let clock = SiderealClock::new(params.clock.clone(), stored_interval);

        let rates = RateTable::new(
            [&params.axis1, &params.axis2],
            clock.ratio_corrected_interval(),
        )?;

        // Park state, a park interrupted by a restart cannot be trusted
        let park_position: Option<ParkPosition> = stored(store.as_ref(), KEY_PARK_POSITION);
        let stored_park: ParkState = store::load_or(store.as_ref(), KEY_PARK_STATUS, ParkState::NotParked);
        let mut park_state = stored_park.on_boot();

        let home = [
            (params.axis1.home_deg * params.axis1.steps_per_degree).round() as i32,
            (params.axis2.home_deg * params.axis2.steps_per_degree).round() as i32,
        ];
        let boot = match (park_state, park_position) {
            (ParkState::Parked, Some(p)) => [p.axis1_steps, p.axis2_steps],
            (ParkState::Parked, None) => {
                warn!("Stored as parked with no park position, starting at home");
                park_state = ParkState::NotParked;
                home
            }
            _ => home,
        };
        if park_state != stored_park {
            warn!("Park state {:?} restored as {:?}", stored_park, park_state);
            store::save(store.as_mut(), KEY_PARK_STATUS, &park_state)?;
        }

        let backlash = [
            store::load_or(store.as_ref(), KEY_BACKLASH_AXIS1, params.axis1.backlash_steps),
            store::load_or(store.as_ref(), KEY_BACKLASH_AXIS2, params.axis2.backlash_steps),
        ];

        let mut axes = [
            AxisCtrl::new(
                AxisId::Axis1,
                &params.axis1,
                *rates.axis(AxisId::Axis1),
                boot[0],
                backlash[0],
            ),
            AxisCtrl::new(
                AxisId::Axis2,
                &params.axis2,
                *rates.axis(AxisId::Axis2),
                boot[1],
                backlash[1],
            ),
        ];
        if park_state == ParkState::Parked && params.disable_axes_on_park {
            for axis in axes.iter_mut() {
                axis.set_enabled(false);
            }
        }

        let guide_params = GuideParams {
            guide_rate: store::load_or(store.as_ref(), KEY_GUIDE_RATE, params.guide.guide_rate),
            pulse_guide_rate: store::load_or(
                store.as_ref(),
                KEY_PULSE_GUIDE_RATE,
                params.guide.pulse_guide_rate,
            ),
            ..params.guide.clone()
        };
        let guide = GuideBlender::new(&guide_params, &rates)?;

        let mut pec = PecEngine::new(
            params.pec.clone(),
            rates.axis(AxisId::Axis1).steps_per_second,
        );
        if let Some(table) = stored::<Vec<i8>>(store.as_ref(), KEY_PEC_TABLE) {
            pec.load(table, store::load_or(store.as_ref(), KEY_PEC_RECORDED, false));
        }

        info!(
            "MountCtrl initialised at ({}, {}) steps, park state {:?}",
            boot[0], boot[1], park_state
        );

        let ticks = clock.ticks();

        Ok(Self {
            params,
            store,
            clock,
            rates,
            axes,
            guide,
            pec,
            mode: Mode::Off,
            last_mode: Mode::Off,
            goto_kind: None,
            abort_requested: false,
            park_state,
            park_position,
            flip: FlipStage::Idle,
            flip_pointing: None,
            sync_offset: [0; NUM_AXES],
            general_error: GeneralError::None,
            fault_handled: false,
            tracking: TrackingRates::SIDEREAL,
            compensation_due: true,
            last_compensation_ticks: ticks,
            last_ticks: ticks,
            now_us: 0,
            workload: Workload::default(),
        })
    }

    /// Perform one main loop pass.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let start = Instant::now();
        let mut report = StatusReport::default();
        self.now_us = input_data.now_us;

        let clock_status = self.clock.service(input_data.now_us);
        self.follow_interval(clock_status.corrected_interval);

        self.check_faults(&mut report);

        if input_data.worm_sense {
            self.pec.sense(self.axes[0].position(), clock_status.ticks);
        }

        self.guide.service(input_data.now_us);

        let elapsed = ticks_since(clock_status.ticks, self.last_ticks);
        self.last_ticks = clock_status.ticks;

        self.update_compensation(clock_status.ticks);

        let (multiples, guide_steps) = self.advance_targets(elapsed, &mut report);

        match self.mode {
            Mode::Sidereal => self.process_tracking(&mut report),
            Mode::MoveTo { .. } => self.process_move(&mut report),
            Mode::Off => (),
        }

        for (axis, multiple) in self.axes.iter_mut().zip(multiples.iter()) {
            axis.update_rate(*multiple);
        }

        self.service_pec(guide_steps, &mut report);

        self.workload.record(start.elapsed().as_micros() as u32);

        let status = self.status();
        trace!("MountCtrl status: {:?}", status);

        Ok((status, report))
    }
}

impl MountCtrl {
    // ---- TRACKING ----

    /// Start tracking at the (compensated) sidereal rate.
    ///
    /// During a goto this changes the mode restored on arrival.
    pub fn start_tracking(&mut self) -> Result<(), MountError> {
        if self.park_state == ParkState::Parked {
            return Err(MountError::Parked);
        }
        if self.faulted() {
            return Err(MountError::MotorFault);
        }

        if self.mode.is_move_to() {
            self.last_mode = Mode::Sidereal;
            return Ok(());
        }

        if self.general_error.is_tracking_limit() {
            self.general_error = GeneralError::None;
        }
        for axis in self.axes.iter_mut() {
            axis.clear_soft_limit();
        }

        if self.mode != Mode::Sidereal {
            info!("Tracking started");
        }
        self.mode = Mode::Sidereal;
        self.compensation_due = true;
        Ok(())
    }

    /// Stop tracking. During a goto this changes the mode restored on arrival, and a flip
    /// waiting at home is dropped so it cannot restart tracking later.
    pub fn stop_tracking(&mut self) {
        match self.mode {
            Mode::MoveTo { .. } => self.last_mode = Mode::Off,
            Mode::Sidereal => {
                info!("Tracking stopped");
                self.mode = Mode::Off;
            }
            Mode::Off => (),
        }

        if self.flip == FlipStage::WaitingHome {
            info!("Meridian flip cancelled");
            self.flip = FlipStage::Idle;
            self.flip_pointing = None;
        }
    }

    pub fn set_rate_compensation(&mut self, mode: RateCompensation) {
        info!("Rate compensation set to {:?}", mode);
        self.params.rate_compensation = mode;
        self.compensation_due = true;
    }

    pub fn set_atmosphere(&mut self, atmosphere: Atmosphere) {
        self.params.atmosphere = atmosphere;
        self.compensation_due = true;
    }

    // ---- GOTO ----

    /// Start a ramped move to a target, validated against the altitude, meridian and axis
    /// limits. The current mode is restored on arrival.
    pub fn goto(&mut self, target: GotoTarget) -> Result<(), MountError> {
        self.check_can_move()?;

        let (a1, a2) = match target {
            GotoTarget::Axes {
                axis1_deg,
                axis2_deg,
            } => (axis1_deg, axis2_deg),
            GotoTarget::Equatorial {
                ha_deg,
                dec_deg,
                pier_side,
            } => {
                let ha = util::maths::wrap_180(ha_deg);
                let side = self.choose_side(ha, pier_side)?;
                equ_to_axes(ha, dec_deg, side)
            }
        };

        let (ha, dec) = axes_to_equ(a1, a2);
        let alt = self.altitude(ha, dec);
        if alt < self.params.limits.min_altitude_deg {
            return Err(MountError::BelowHorizon);
        }
        if alt > self.params.limits.max_altitude_deg {
            return Err(MountError::AboveOverhead);
        }
        if !PierSide::from_axis2_deg(a2).allows(ha, &self.params.limits) {
            return Err(MountError::OutsideLimits);
        }

        let steps = self.motor_steps(a1, a2).ok_or(MountError::OutsideLimits)?;

        self.flip = FlipStage::Idle;
        self.flip_pointing = None;
        self.start_move(GotoKind::Target, steps)?;

        info!(
            "Goto HA {:.4} deg, Dec {:.4} deg ({:?} side)",
            ha,
            dec,
            PierSide::from_axis2_deg(a2)
        );
        Ok(())
    }

    /// Move to the home position, tracking stops on arrival.
    pub fn go_home(&mut self) -> Result<(), MountError> {
        self.check_can_move()?;
        self.flip = FlipStage::Idle;
        self.flip_pointing = None;
        self.start_move(GotoKind::Home, self.home_steps())?;
        self.last_mode = Mode::Off;
        info!("Moving to home");
        Ok(())
    }

    /// Stop guiding and bring any goto to rest along its deceleration ramp. The mode from before
    /// the goto is restored once stopped.
    pub fn abort(&mut self) {
        self.guide.stop_all();

        match self.mode {
            Mode::MoveTo { .. } => {
                info!("Aborting {:?}", self.goto_kind);
                self.abort_requested = true;
                for axis in self.axes.iter_mut() {
                    axis.abort_goto();
                }
            }
            _ if self.flip == FlipStage::WaitingHome => {
                info!("Meridian flip cancelled");
                self.flip = FlipStage::Idle;
                self.flip_pointing = None;
            }
            _ => (),
        }
    }

    // ---- SYNC ----

    /// Declare the current pointing to be `target` without moving.
    pub fn sync(&mut self, target: GotoTarget) -> Result<(), MountError> {
        if self.mode.is_move_to() || self.park_state == ParkState::Parked || self.guide.is_guiding()
        {
            return Err(MountError::Sync);
        }

        let (a1, a2) = match target {
            GotoTarget::Axes {
                axis1_deg,
                axis2_deg,
            } => (axis1_deg, axis2_deg),
            GotoTarget::Equatorial {
                ha_deg,
                dec_deg,
                pier_side,
            } => equ_to_axes(
                util::maths::wrap_180(ha_deg),
                dec_deg,
                pier_side.unwrap_or_else(|| self.pier_side()),
            ),
        };

        let (ha, _) = axes_to_equ(a1, a2);
        if !PierSide::from_axis2_deg(a2).allows(ha, &self.params.limits) {
            self.general_error = GeneralError::Sync;
            return Err(MountError::Sync);
        }

        for (i, (axis, deg)) in self.axes.iter_mut().zip([a1, a2].iter()).enumerate() {
            axis.hold();
            self.sync_offset[i] = axis.steps_for_deg(*deg) - axis.position();
        }

        if self.general_error == GeneralError::Sync {
            self.general_error = GeneralError::None;
        }
        self.compensation_due = true;
        info!("Synced to axes ({:.4}, {:.4}) deg", a1, a2);
        Ok(())
    }

    // ---- GUIDING ----

    /// Start a guide on an axis, a `duration_ms` makes it a pulse guide.
    pub fn guide(
        &mut self,
        axis: AxisId,
        dir: GuideDir,
        duration_ms: Option<u32>,
    ) -> Result<(), MountError> {
        if self.park_state == ParkState::Parked {
            return Err(MountError::Parked);
        }
        if self.mode.is_move_to() {
            return Err(MountError::MountInMotion);
        }
        if self.faulted() {
            return Err(MountError::MotorFault);
        }

        self.guide.start(axis, dir, duration_ms, self.now_us)?;
        Ok(())
    }

    /// Stop guiding one axis, or both.
    pub fn stop_guide(&mut self, axis: Option<AxisId>) {
        match axis {
            Some(a) => self.guide.stop(a),
            None => self.guide.stop_all(),
        }
    }

    pub fn set_guide_rate(&mut self, index: usize) -> Result<(), MountError> {
        self.guide.set_guide_rate(index)?;
        store::save(self.store.as_mut(), KEY_GUIDE_RATE, &index)?;
        Ok(())
    }

    pub fn set_pulse_guide_rate(&mut self, index: usize) -> Result<(), MountError> {
        self.guide.set_pulse_guide_rate(index)?;
        store::save(self.store.as_mut(), KEY_PULSE_GUIDE_RATE, &index)?;
        Ok(())
    }

    // ---- PEC ----

    pub fn pec_play(&mut self) -> Result<(), MountError> {
        Ok(self.pec.start_play()?)
    }

    pub fn pec_record(&mut self) -> Result<(), MountError> {
        Ok(self.pec.start_record()?)
    }

    pub fn pec_stop(&mut self) {
        self.pec.stop();
    }

    /// Clear the PEC table, both in memory and in the store.
    pub fn pec_clear(&mut self) -> Result<(), MountError> {
        self.pec.clear();
        self.save_pec()
    }

    // ---- SETTINGS ----

    pub fn set_backlash(&mut self, axis: AxisId, steps: u32) -> Result<(), MountError> {
        self.axes[axis.index()].set_backlash(steps);
        let key = match axis {
            AxisId::Axis1 => KEY_BACKLASH_AXIS1,
            AxisId::Axis2 => KEY_BACKLASH_AXIS2,
        };
        store::save(self.store.as_mut(), key, &steps)?;
        info!("{:?} backlash set to {} steps", axis, steps);
        Ok(())
    }

    /// Set the calibrated sidereal interval (timer ticks per sidereal second).
    pub fn set_sidereal_interval(&mut self, interval: u64) -> Result<(), MountError> {
        self.clock.set_interval(interval)?;
        store::save(self.store.as_mut(), KEY_SIDEREAL_INTERVAL, &interval)?;
        Ok(())
    }

    /// Nudge the calibrated sidereal interval, returning the new value.
    pub fn adjust_sidereal_interval(&mut self, delta: i64) -> Result<u64, MountError> {
        let interval = self.clock.adjust_interval(delta)?;
        store::save(self.store.as_mut(), KEY_SIDEREAL_INTERVAL, &interval)?;
        Ok(interval)
    }

    /// Enable or disable both axis drivers. Disabling stops tracking and guiding.
    pub fn set_axes_enabled(&mut self, enabled: bool) -> Result<(), MountError> {
        if !enabled {
            if self.mode.is_move_to() {
                return Err(MountError::MountInMotion);
            }
            self.guide.stop_all();
            self.mode = Mode::Off;
        }
        for axis in self.axes.iter_mut() {
            axis.set_enabled(enabled);
        }
        info!("Axes {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Clear a motor fault. The axes hold where they stopped.
    pub fn reset_fault(&mut self) {
        for axis in self.axes.iter_mut() {
            axis.reset_fault();
        }
        self.fault_handled = false;
        if self.general_error == GeneralError::MotorFault {
            self.general_error = GeneralError::None;
        }
        info!("Motor fault reset");
    }

    pub fn clear_error(&mut self) {
        self.general_error = GeneralError::None;
    }

    // ---- ACCESSORS ----

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn general_error(&self) -> GeneralError {
        self.general_error
    }

    pub fn params(&self) -> &MountCtrlParams {
        &self.params
    }

    pub fn axis(&self, id: AxisId) -> &AxisCtrl {
        &self.axes[id.index()]
    }

    pub fn clock(&self) -> &SiderealClock {
        &self.clock
    }

    pub fn guide_blender(&self) -> &GuideBlender {
        &self.guide
    }

    pub fn pec(&self) -> &PecEngine {
        &self.pec
    }

    pub fn tracking_rates(&self) -> TrackingRates {
        self.tracking
    }

    /// State shared with an axis interrupt.
    pub fn axis_shared(&self, id: AxisId) -> Arc<AxisShared> {
        self.axes[id.index()].shared()
    }

    /// State shared with the clock interrupt.
    pub fn clock_shared(&self) -> Arc<ClockShared> {
        self.clock.shared()
    }

    /// Give up the store, used to simulate a restart.
    pub fn into_store(self) -> Box<dyn NvStore> {
        self.store
    }

    /// Snapshot of the mount.
    pub fn status(&self) -> MountStatus {
        let clock = self.clock.status();
        let (a1, a2) = (
            self.position_deg(AxisId::Axis1),
            self.position_deg(AxisId::Axis2),
        );
        let (ha, dec) = axes_to_equ(a1, a2);
        let (ax1, ax2) = (&self.axes[0], &self.axes[1]);

        MountStatus {
            ticks: clock.ticks,
            mode: self.mode.kind(),
            goto_kind: self.goto_kind,
            park_state: self.park_state,
            pier_side: self.pier_side(),
            flip_stage: self.flip,
            general_error: self.general_error,
            at_home: self.at_home(),
            axis1_deg: a1,
            axis2_deg: a2,
            ha_deg: ha,
            dec_deg: dec,
            alt_deg: self.altitude(ha, dec),
            axis1_steps: ax1.position(),
            axis2_steps: ax2.position(),
            axis1_target_steps: ax1.target().to_f64(),
            axis2_target_steps: ax2.target().to_f64(),
            axis1_rate: ax1.timer_rate(),
            axis2_rate: ax2.timer_rate(),
            axis1_phase: ax1.phase(),
            axis2_phase: ax2.phase(),
            axis1_fault: ax1.fault(),
            axis2_fault: ax2.fault(),
            axes_enabled: ax1.enabled() && ax2.enabled(),
            tracking_axis1: self.tracking.axis1,
            tracking_axis2: self.tracking.axis2,
            guide_axis1: self.guide.contribution(AxisId::Axis1),
            guide_axis2: self.guide.contribution(AxisId::Axis2),
            pec_status: self.pec.status(),
            pec_index: self.pec.index(),
            pec_recorded: self.pec.recorded(),
            sidereal_interval: clock.interval,
            corrected_interval: clock.corrected_interval,
            pps_ratio: clock.pps_ratio,
            pps_locked: clock.pps_locked,
            pass_us: self.workload.last_us,
            worst_pass_us: self.workload.worst_us,
            avg_pass_us: self.workload.avg_us,
        }
    }

    pub fn at_home(&self) -> bool {
        !self.mode.is_move_to()
            && self
                .axes
                .iter()
                .zip(self.home_steps().iter())
                .all(|(a, h)| a.position() == *h)
    }

    // ---- GEOMETRY ----

    /// Synced axis angle of an axis target.
    pub(crate) fn target_deg(&self, id: AxisId) -> f64 {
        let axis = &self.axes[id.index()];
        (axis.target().to_f64() + self.sync_offset[id.index()] as f64)
            / axis.rates().steps_per_degree
    }

    /// Synced axis angle of an axis position.
    pub(crate) fn position_deg(&self, id: AxisId) -> f64 {
        self.index_steps(id) as f64 / self.axes[id.index()].rates().steps_per_degree
    }

    /// Synced position in steps.
    pub(crate) fn index_steps(&self, id: AxisId) -> i32 {
        self.axes[id.index()].position() + self.sync_offset[id.index()]
    }

    /// Motor step targets for a pair of synced axis angles, `None` if outside the axis limits.
    pub(crate) fn motor_steps(&self, axis1_deg: f64, axis2_deg: f64) -> Option<[i32; NUM_AXES]> {
        let mut steps = [0; NUM_AXES];
        for (i, deg) in [axis1_deg, axis2_deg].iter().enumerate() {
            let s = self.axes[i].steps_for_deg(*deg) - self.sync_offset[i];
            if !self.axes[i].in_limits(s) {
                return None;
            }
            steps[i] = s;
        }
        Some(steps)
    }

    /// Motor steps of the home position.
    pub(crate) fn home_steps(&self) -> [i32; NUM_AXES] {
        [
            self.axes[0].steps_for_deg(self.params.axis1.home_deg) - self.sync_offset[0],
            self.axes[1].steps_for_deg(self.params.axis2.home_deg) - self.sync_offset[1],
        ]
    }

    fn altitude(&self, ha_deg: f64, dec_deg: f64) -> f64 {
        equ_to_hor(ha_deg, dec_deg, self.params.latitude_deg).0
    }

    /// Hour angle and declination of the axis targets.
    fn target_equ(&self) -> (f64, f64) {
        axes_to_equ(
            self.target_deg(AxisId::Axis1),
            self.target_deg(AxisId::Axis2),
        )
    }

    fn choose_side(&self, ha_deg: f64, side: Option<PierSide>) -> Result<PierSide, MountError> {
        let limits = &self.params.limits;
        match side {
            Some(s) if s.allows(ha_deg, limits) => Ok(s),
            Some(_) => Err(MountError::OutsideLimits),
            None => {
                let preferred = PierSide::for_hour_angle(ha_deg);
                if preferred.allows(ha_deg, limits) {
                    Ok(preferred)
                } else if preferred.other().allows(ha_deg, limits) {
                    Ok(preferred.other())
                } else {
                    Err(MountError::OutsideLimits)
                }
            }
        }
    }

    // ---- MOTION ----

    pub(crate) fn faulted(&self) -> bool {
        self.axes.iter().any(|a| a.fault())
    }

    fn check_can_move(&self) -> Result<(), MountError> {
        if self.park_state == ParkState::Parked {
            return Err(MountError::Parked);
        }
        if self.faulted() {
            return Err(MountError::MotorFault);
        }
        if self.mode.is_move_to() {
            return Err(MountError::GotoInProgress);
        }
        Ok(())
    }

    /// Enter `MoveTo` towards motor step targets, remembering the current mode.
    pub(crate) fn start_move(
        &mut self,
        kind: GotoKind,
        steps: [i32; NUM_AXES],
    ) -> Result<(), MountError> {
        for (axis, s) in self.axes.iter_mut().zip(steps.iter()) {
            if let Err(e) = axis.start_goto(*s) {
                self.stop_motion();
                return Err(e.into());
            }
        }

        self.guide.stop_all();
        if !self.mode.is_move_to() {
            self.last_mode = self.mode;
        }
        self.mode = Mode::MoveTo {
            target_axis1: self.axes[0].target(),
            target_axis2: self.axes[1].target(),
        };
        self.goto_kind = Some(kind);
        self.abort_requested = false;

        debug!("MoveTo ({}, {}) steps for {:?}", steps[0], steps[1], kind);
        Ok(())
    }

    /// Stop dead with tracking off.
    fn stop_motion(&mut self) {
        for axis in self.axes.iter_mut() {
            axis.finish_goto();
            axis.hold();
        }
        self.guide.stop_all();
        self.mode = Mode::Off;
        self.goto_kind = None;
        self.abort_requested = false;
    }

    /// Stop tracking because of a limit.
    pub(crate) fn halt_tracking(&mut self, reason: GeneralError, report: &mut StatusReport) {
        warn!("Tracking halted: {:?}", reason);
        self.stop_motion();
        self.general_error = reason;
        report.tracking_halted = Some(reason);
    }

    // ---- MAIN LOOP ----

    /// Follow changes of the corrected clock interval into the rate table.
    fn follow_interval(&mut self, corrected_interval: u64) {
        let takeup = [
            self.params.axis1.takeup_multiple,
            self.params.axis2.takeup_multiple,
        ];
        if !self.rates.set_interval(corrected_interval, takeup) {
            return;
        }

        for axis in self.axes.iter_mut() {
            let rates = *self.rates.axis(axis.id());
            axis.set_rates(rates);
        }
        self.guide.set_rates(&self.rates);
        debug!("Rate table follows interval {}", corrected_interval);
    }

    fn check_faults(&mut self, report: &mut StatusReport) {
        if !self.faulted() || self.fault_handled {
            return;
        }
        self.fault_handled = true;

        for axis in self.axes.iter().filter(|a| a.fault()) {
            error!("Motor fault on {:?} at {} steps", axis.id(), axis.position());
        }

        if self.park_state == ParkState::Parking {
            self.park_failed();
        }
        self.flip = FlipStage::Idle;
        self.flip_pointing = None;

        self.stop_motion();
        self.general_error = GeneralError::MotorFault;
        report.tracking_halted = Some(GeneralError::MotorFault);
    }

    fn update_compensation(&mut self, ticks: u32) {
        let period = (self.params.compensation_period_s * TICKS_PER_SECOND as f64).max(1.0) as u32;
        if !self.compensation_due && ticks_since(ticks, self.last_compensation_ticks) < period {
            return;
        }
        self.compensation_due = false;
        self.last_compensation_ticks = ticks;

        let (ha, dec) = self.target_equ();
        self.tracking = compensate(
            self.params.rate_compensation,
            ha,
            dec,
            self.params.latitude_deg,
            &self.params.atmosphere,
        );
        trace!("Tracking rates {:?}", self.tracking);
    }

    /// Advance the axis targets for the clock ticks elapsed since the last pass.
    ///
    /// Returns the total rate of each axis in sidereal multiples and the axis 1 guide steps
    /// applied, for PEC recording.
    fn advance_targets(
        &mut self,
        elapsed: u32,
        report: &mut StatusReport,
    ) -> ([f64; NUM_AXES], f64) {
        let side = self.pier_side().axis2_sign();

        let tracking = match self.mode {
            Mode::Sidereal => true,
            Mode::MoveTo { .. } => self.goto_tracks(),
            Mode::Off => false,
        };
        let base = match tracking {
            true => [self.tracking.axis1, self.tracking.axis2 * side],
            false => [0.0, 0.0],
        };
        let guide = [
            self.guide.contribution(AxisId::Axis1),
            self.guide.contribution(AxisId::Axis2) * side,
        ];
        let pec = match self.mode {
            Mode::Sidereal => self.pec.rate_multiple(),
            _ => 0.0,
        };
        let multiples = [base[0] + guide[0] + pec, base[1] + guide[1]];

        let guide_steps = guide[0] * self.axes[0].rates().steps_per_second * elapsed as f64
            / TICKS_PER_SECOND as f64;

        let mut at_limit = false;
        for (axis, multiple) in self.axes.iter_mut().zip(multiples.iter()) {
            let delta = axis.rates().fstep(*multiple) * elapsed as i64;
            if axis.advance_target(delta).is_err() {
                at_limit = true;
            }
        }

        if let Mode::MoveTo { .. } = self.mode {
            self.mode = Mode::MoveTo {
                target_axis1: self.axes[0].target(),
                target_axis2: self.axes[1].target(),
            };
        } else if at_limit {
            self.halt_tracking(GeneralError::LimitSense, report);
        }

        (multiples, guide_steps)
    }

    fn process_tracking(&mut self, report: &mut StatusReport) {
        for axis in self.axes.iter() {
            if let Err(e) = axis.check_divergence() {
                error!("{}", e);
            }
        }
        if self.faulted() {
            return;
        }

        let (ha, dec) = self.target_equ();
        let alt = self.altitude(ha, dec);

        if alt < self.params.limits.min_altitude_deg {
            self.halt_tracking(GeneralError::AltMin, report);
        } else if alt > self.params.limits.max_altitude_deg {
            self.halt_tracking(GeneralError::AltMax, report);
        } else {
            self.check_meridian(ha, dec, report);
        }
    }

    /// Whether the current goto's target moves with the sky.
    fn goto_tracks(&self) -> bool {
        self.last_mode == Mode::Sidereal
            && !self.abort_requested
            && matches!(self.goto_kind, Some(GotoKind::Target) | Some(GotoKind::Flip))
    }

    fn process_move(&mut self, report: &mut StatusReport) {
        // Moving targets can only be caught to within a tolerance
        let tol = match self.goto_tracks() {
            true => self.params.arrival_tolerance_steps,
            false => 0,
        };
        if !self.axes.iter().all(|a| a.at_target(tol)) {
            return;
        }

        for axis in self.axes.iter_mut() {
            axis.finish_goto();
        }
        let kind = self.goto_kind.take();
        let aborted = std::mem::replace(&mut self.abort_requested, false);
        report.goto_completed = true;

        match kind {
            Some(GotoKind::Park) => self.park_arrived(aborted),
            Some(k @ GotoKind::FlipHome) | Some(k @ GotoKind::Flip) => {
                self.flip_arrived(k, aborted)
            }
            Some(GotoKind::Home) => {
                info!("At home");
                self.mode = Mode::Off;
            }
            _ => {
                self.mode = self.last_mode;
                info!(
                    "Goto {}, mode {:?}",
                    if aborted { "aborted" } else { "complete" },
                    self.mode.kind()
                );
            }
        }
        self.compensation_due = true;
    }

    fn service_pec(&mut self, guide_steps: f64, report: &mut StatusReport) {
        let tracking = self.mode == Mode::Sidereal;
        match self.pec.service(self.axes[0].position(), tracking, guide_steps) {
            Ok(Some(PecEvent::Recorded)) => {
                report.pec_event = Some(PecEvent::Recorded);
                if let Err(e) = self.save_pec() {
                    warn!("Could not save the PEC table: {}", e);
                }
            }
            Ok(event) => report.pec_event = event,
            Err(e) => {
                warn!("{}", e);
                report.pec_incomplete = true;
            }
        }
    }

    fn save_pec(&mut self) -> Result<(), MountError> {
        store::save(self.store.as_mut(), KEY_PEC_TABLE, &self.pec.table())?;
        store::save(self.store.as_mut(), KEY_PEC_RECORDED, &self.pec.recorded())?;
        Ok(())
    }
}

impl Workload {
    fn record(&mut self, pass_us: u32) {
        self.last_us = pass_us;
        self.worst_us = self.worst_us.max(pass_us);
        self.avg_us = match self.avg_us == 0.0 {
            true => pass_us as f64,
            false => self.avg_us + (pass_us as f64 - self.avg_us) * WORKLOAD_FILTER,
        };
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an optional setting from the store, a corrupt value is reported and ignored.
fn stored<T: serde::de::DeserializeOwned>(store: &dyn NvStore, key: &str) -> Option<T> {
    match store::load(store, key) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring stored {}: {}", key, e);
            None
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        axis::AxisParams,
        guide::GuideDir,
        mount_ctrl::MeridianFlip,
        sim::Simulator,
        store::MemStore,
    };

    fn params() -> MountCtrlParams {
        MountCtrlParams {
            axis1: AxisParams {
                steps_per_degree: 1000.0,
                min_deg: -200.0,
                max_deg: 200.0,
                max_slew_rate_dps: 4.0,
                max_accel_dps2: 2.0,
                ..AxisParams::default()
            },
            axis2: AxisParams {
                steps_per_degree: 1000.0,
                min_deg: -90.0,
                max_deg: 270.0,
                home_deg: 90.0,
                max_slew_rate_dps: 4.0,
                max_accel_dps2: 2.0,
                ..AxisParams::default()
            },
            ..MountCtrlParams::default()
        }
    }

    fn ctrl_with(params: MountCtrlParams, store: Box<dyn NvStore>) -> MountCtrl {
        MountCtrl::init(MountInit { params, store }).unwrap()
    }

    fn sim(params: MountCtrlParams) -> Simulator {
        Simulator::new(ctrl_with(params, Box::new(MemStore::new())))
    }

    /// East side pointing just short of the meridian limit.
    fn near_meridian() -> GotoTarget {
        GotoTarget::Equatorial {
            ha_deg: 14.9,
            dec_deg: 20.0,
            pier_side: Some(PierSide::East),
        }
    }

    fn run_goto(sim: &mut Simulator) {
        let done = sim.run_until(|c| !c.mode().is_move_to(), 600.0).unwrap();
        assert!(done, "goto did not complete");
    }

    #[test]
    fn test_boot_state() {
        let c = ctrl_with(params(), Box::new(MemStore::new()));
        assert_eq!(c.mode(), Mode::Off);
        assert_eq!(c.park_state(), ParkState::NotParked);
        assert_eq!(c.axis(AxisId::Axis2).position(), 90_000);
        assert_eq!(c.pier_side(), PierSide::East);
        assert!(c.at_home());
    }

    #[test]
    fn test_goto_validation() {
        let mut c = ctrl_with(params(), Box::new(MemStore::new()));

        // Latitude 51.5, Dec -60 on the meridian is 21.5 deg below the horizon
        let below = GotoTarget::Equatorial {
            ha_deg: 0.0,
            dec_deg: -60.0,
            pier_side: None,
        };
        assert!(matches!(c.goto(below), Err(MountError::BelowHorizon)));

        let east_past_limit = GotoTarget::Equatorial {
            ha_deg: 30.0,
            dec_deg: 20.0,
            pier_side: Some(PierSide::East),
        };
        assert!(matches!(
            c.goto(east_past_limit),
            Err(MountError::OutsideLimits)
        ));

        let beyond_travel = GotoTarget::Axes {
            axis1_deg: 250.0,
            axis2_deg: 100.0,
        };
        assert!(matches!(c.goto(beyond_travel), Err(MountError::OutsideLimits)));
        assert_eq!(c.mode(), Mode::Off);

        c.goto(near_meridian()).unwrap();
        assert!(matches!(c.goto(near_meridian()), Err(MountError::GotoInProgress)));
        assert!(matches!(c.sync(near_meridian()), Err(MountError::Sync)));
        assert!(matches!(
            c.guide(AxisId::Axis1, GuideDir::Forward, None),
            Err(MountError::MountInMotion)
        ));
    }

    #[test]
    fn test_goto_while_tracking_ends_at_sidereal_rate() {
        let mut sim = sim(params());
        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut()
            .goto(GotoTarget::Equatorial {
                ha_deg: -30.0,
                dec_deg: 20.0,
                pier_side: None,
            })
            .unwrap();
        run_goto(&mut sim);
        sim.run_for(2.0).unwrap();

        let c = sim.ctrl();
        assert_eq!(c.mode(), Mode::Sidereal);
        assert_eq!(sim.log().gotos_completed, 1);

        let axis1 = c.axis(AxisId::Axis1);
        assert_eq!(axis1.timer_rate(), axis1.rates().sidereal_rate);
        assert!(axis1.distance_to_go().abs() <= 2);

        // The target kept moving with the sky during the goto
        let (ha, dec) = axes_to_equ(
            c.position_deg(AxisId::Axis1),
            c.position_deg(AxisId::Axis2),
        );
        assert!(ha > -30.0 && ha < -29.9, "ha {}", ha);
        assert!((dec - 20.0).abs() < 0.002);
    }

    #[test]
    fn test_abort_decelerates_and_restores_mode() {
        let mut sim = sim(params());
        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut()
            .goto(GotoTarget::Axes {
                axis1_deg: -100.0,
                axis2_deg: 20.0,
            })
            .unwrap();
        sim.run_for(5.0).unwrap();

        let pos = sim.ctrl().axis(AxisId::Axis1).position();
        sim.ctrl_mut().abort();
        run_goto(&mut sim);

        let c = sim.ctrl();
        assert_eq!(c.mode(), Mode::Sidereal);
        let stopped = c.axis(AxisId::Axis1).position();
        // Came to rest past the abort point but well short of the target
        assert!(stopped < pos);
        assert!(stopped > -100_000);
    }

    #[test]
    fn test_meridian_never_halts_tracking() {
        let mut sim = sim(params());
        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().goto(near_meridian()).unwrap();
        run_goto(&mut sim);

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 120.0)
            .unwrap();
        assert!(halted);
        assert_eq!(sim.ctrl().general_error(), GeneralError::Meridian);
        assert_eq!(sim.log().halts, vec![GeneralError::Meridian]);
        assert_eq!(sim.log().flips_started, 0);
        assert_eq!(sim.ctrl().pier_side(), PierSide::East);

        // Restarting tracking past the limit halts again
        sim.ctrl_mut().start_tracking().unwrap();
        assert_eq!(sim.ctrl().general_error(), GeneralError::None);
        sim.run_for(1.0).unwrap();
        assert_eq!(sim.ctrl().mode(), Mode::Off);
    }

    #[test]
    fn test_meridian_always_flips_once() {
        let mut p = params();
        p.meridian_flip = MeridianFlip::Always;
        let mut sim = sim(p);

        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().goto(near_meridian()).unwrap();
        run_goto(&mut sim);

        let flipped = sim
            .run_until(|c| c.flip_stage() == FlipStage::ToTarget, 120.0)
            .unwrap();
        assert!(flipped);
        run_goto(&mut sim);
        sim.run_for(60.0).unwrap();

        let c = sim.ctrl();
        assert_eq!(sim.log().flips_started, 1);
        assert_eq!(c.mode(), Mode::Sidereal);
        assert_eq!(c.pier_side(), PierSide::West);
        assert_eq!(c.flip_stage(), FlipStage::Idle);
        assert_eq!(c.general_error(), GeneralError::None);

        // Same sky position on the other side
        let s = c.status();
        assert!(s.ha_deg > 15.0 && s.ha_deg < 16.0, "ha {}", s.ha_deg);
        assert!((s.dec_deg - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_flip_pauses_at_home() {
        let mut p = params();
        p.meridian_flip = MeridianFlip::Always;
        p.pause_home = true;
        let mut sim = sim(p);

        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().goto(near_meridian()).unwrap();
        run_goto(&mut sim);

        let waiting = sim
            .run_until(|c| c.flip_stage() == FlipStage::WaitingHome, 300.0)
            .unwrap();
        assert!(waiting);
        assert!(sim.ctrl().at_home());
        assert_eq!(sim.ctrl().mode(), Mode::Off);

        sim.ctrl_mut().continue_flip().unwrap();
        run_goto(&mut sim);

        let c = sim.ctrl();
        assert_eq!(c.mode(), Mode::Sidereal);
        assert_eq!(c.pier_side(), PierSide::West);
        assert_eq!(sim.log().flips_started, 1);
        assert!(matches!(
            sim.ctrl_mut().continue_flip(),
            Err(MountError::NoFlipWaiting)
        ));
    }

    #[test]
    fn test_stop_tracking_cancels_waiting_flip() {
        let mut p = params();
        p.meridian_flip = MeridianFlip::Always;
        p.pause_home = true;
        let mut sim = sim(p);

        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().goto(near_meridian()).unwrap();
        run_goto(&mut sim);

        let waiting = sim
            .run_until(|c| c.flip_stage() == FlipStage::WaitingHome, 300.0)
            .unwrap();
        assert!(waiting);

        sim.ctrl_mut().stop_tracking();
        assert_eq!(sim.ctrl().flip_stage(), FlipStage::Idle);
        assert!(matches!(
            sim.ctrl_mut().continue_flip(),
            Err(MountError::NoFlipWaiting)
        ));

        let pos = sim.ctrl().axis(AxisId::Axis1).position();
        sim.run_for(5.0).unwrap();
        assert_eq!(sim.ctrl().mode(), Mode::Off);
        assert_eq!(sim.ctrl().axis(AxisId::Axis1).position(), pos);
    }

    #[test]
    fn test_stop_tracking_during_flip_home_leaves_tracking_off() {
        let mut p = params();
        p.meridian_flip = MeridianFlip::Always;
        p.pause_home = true;
        let mut sim = sim(p);

        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().goto(near_meridian()).unwrap();
        run_goto(&mut sim);

        let flipping = sim
            .run_until(|c| c.flip_stage() == FlipStage::ToHome, 120.0)
            .unwrap();
        assert!(flipping);

        sim.ctrl_mut().stop_tracking();
        run_goto(&mut sim);

        let c = sim.ctrl();
        assert!(c.at_home());
        assert_eq!(c.mode(), Mode::Off);
        assert_eq!(c.flip_stage(), FlipStage::Idle);
    }

    #[test]
    fn test_travel_limit_halts_tracking() {
        let mut p = params();
        p.axis1.max_deg = 10.0;
        let mut sim = sim(p);

        sim.ctrl_mut()
            .goto(GotoTarget::Axes {
                axis1_deg: 9.95,
                axis2_deg: 20.0,
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().start_tracking().unwrap();

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 60.0)
            .unwrap();
        assert!(halted);
        assert_eq!(sim.ctrl().general_error(), GeneralError::LimitSense);
        assert_eq!(sim.log().halts, vec![GeneralError::LimitSense]);
        assert!(sim.ctrl().axis(AxisId::Axis1).position() <= 10_000);

        // Still against the limit, so tracking halts again straight away
        sim.ctrl_mut().start_tracking().unwrap();
        sim.run_for(1.0).unwrap();
        assert_eq!(sim.ctrl().mode(), Mode::Off);
        assert!(sim.ctrl().axis(AxisId::Axis1).position() <= 10_000);
    }

    #[test]
    fn test_setting_below_min_altitude_halts_tracking() {
        let mut p = params();
        // Setting in the west, 0.05 deg above the horizon limit
        let alt = equ_to_hor(80.0, 0.0, p.latitude_deg).0;
        p.limits.min_altitude_deg = alt - 0.05;
        let mut sim = sim(p);

        sim.ctrl_mut()
            .goto(GotoTarget::Equatorial {
                ha_deg: 80.0,
                dec_deg: 0.0,
                pier_side: Some(PierSide::West),
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().start_tracking().unwrap();
        sim.run_for(1.0).unwrap();
        assert_eq!(sim.ctrl().mode(), Mode::Sidereal);

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 120.0)
            .unwrap();
        assert!(halted);
        assert_eq!(sim.ctrl().general_error(), GeneralError::AltMin);
        assert_eq!(sim.log().halts, vec![GeneralError::AltMin]);
        assert_eq!(sim.ctrl().pier_side(), PierSide::West);
    }

    #[test]
    fn test_rising_above_max_altitude_halts_tracking() {
        let mut p = params();
        let alt = equ_to_hor(-30.0, 40.0, p.latitude_deg).0;
        p.limits.max_altitude_deg = alt + 0.05;
        let mut sim = sim(p);

        sim.ctrl_mut()
            .goto(GotoTarget::Equatorial {
                ha_deg: -30.0,
                dec_deg: 40.0,
                pier_side: Some(PierSide::East),
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().start_tracking().unwrap();

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 120.0)
            .unwrap();
        assert!(halted);
        assert_eq!(sim.ctrl().general_error(), GeneralError::AltMax);
        assert_eq!(sim.log().halts, vec![GeneralError::AltMax]);
        assert_eq!(sim.log().flips_started, 0);
    }

    #[test]
    fn test_under_pole_limit_halts_west_tracking() {
        let mut p = params();
        p.limits.under_pole_deg = 60.0;
        // Flipping is irrelevant on the west side
        p.meridian_flip = MeridianFlip::Always;
        let mut sim = sim(p);

        sim.ctrl_mut()
            .goto(GotoTarget::Equatorial {
                ha_deg: 59.9,
                dec_deg: 20.0,
                pier_side: Some(PierSide::West),
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().start_tracking().unwrap();

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 120.0)
            .unwrap();
        assert!(halted);
        assert_eq!(sim.ctrl().general_error(), GeneralError::UnderPole);
        assert_eq!(sim.log().halts, vec![GeneralError::UnderPole]);
        assert_eq!(sim.log().flips_started, 0);
        assert_eq!(sim.ctrl().pier_side(), PierSide::West);
    }

    #[test]
    fn test_stalled_axis_faults_and_halts_tracking() {
        let mut p = params();
        p.axis1.divergence_tolerance_steps = 20;
        let mut sim = sim(p);

        // Drivers off, so the target runs away from the position
        sim.ctrl_mut().set_axes_enabled(false).unwrap();
        sim.ctrl_mut().start_tracking().unwrap();

        let halted = sim
            .run_until(|c| c.mode() == Mode::Off, 60.0)
            .unwrap();
        assert!(halted);

        let c = sim.ctrl();
        assert!(c.axis(AxisId::Axis1).fault());
        assert!(!c.axis(AxisId::Axis2).fault());
        assert_eq!(c.general_error(), GeneralError::MotorFault);
        assert_eq!(sim.log().halts, vec![GeneralError::MotorFault]);
        assert_eq!(c.axis(AxisId::Axis1).position(), 0);
        assert_eq!(c.axis(AxisId::Axis1).distance_to_go(), 0);
        assert!(matches!(
            sim.ctrl_mut().start_tracking(),
            Err(MountError::MotorFault)
        ));

        sim.ctrl_mut().set_axes_enabled(true).unwrap();
        sim.ctrl_mut().reset_fault();
        sim.ctrl_mut().start_tracking().unwrap();
        sim.run_for(10.0).unwrap();
        assert_eq!(sim.ctrl().mode(), Mode::Sidereal);
        assert_eq!(sim.log().halts.len(), 1);
    }

    #[test]
    fn test_goto_rejected_above_max_altitude() {
        let mut p = params();
        p.limits.max_altitude_deg = 60.0;
        let mut c = ctrl_with(p, Box::new(MemStore::new()));

        // Dec 40 on the meridian culminates at 78.5 deg from latitude 51.5
        let high = GotoTarget::Equatorial {
            ha_deg: 0.0,
            dec_deg: 40.0,
            pier_side: None,
        };
        assert!(matches!(c.goto(high), Err(MountError::AboveOverhead)));
        assert_eq!(c.mode(), Mode::Off);
        assert!(c.at_home());

        let low = GotoTarget::Equatorial {
            ha_deg: -30.0,
            dec_deg: 0.0,
            pier_side: None,
        };
        c.goto(low).unwrap();
        assert!(c.mode().is_move_to());
    }

    #[test]
    fn test_park_without_position() {
        let mut c = ctrl_with(params(), Box::new(MemStore::new()));
        c.start_tracking().unwrap();

        assert!(matches!(c.park(), Err(MountError::NoParkPositionSet)));
        assert_eq!(c.mode(), Mode::Sidereal);
        assert_eq!(c.park_state(), ParkState::NotParked);
        assert!(matches!(c.unpark(), Err(MountError::NotParked)));
    }

    #[test]
    fn test_park_and_reboot() {
        let mut sim = sim(params());
        sim.ctrl_mut()
            .goto(GotoTarget::Axes {
                axis1_deg: -10.0,
                axis2_deg: 60.0,
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().set_park().unwrap();

        sim.ctrl_mut().go_home().unwrap();
        run_goto(&mut sim);
        assert!(sim.ctrl().at_home());

        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().park().unwrap();
        assert_eq!(sim.ctrl().park_state(), ParkState::Parking);
        run_goto(&mut sim);

        let c = sim.ctrl();
        assert_eq!(c.park_state(), ParkState::Parked);
        assert_eq!(c.mode(), Mode::Off);
        assert!(!c.axis(AxisId::Axis1).enabled());
        assert_eq!(c.axis(AxisId::Axis1).position(), -10_000);
        assert_eq!(c.axis(AxisId::Axis2).position(), 60_000);

        assert!(matches!(
            sim.ctrl_mut().start_tracking(),
            Err(MountError::Parked)
        ));
        assert!(matches!(sim.ctrl_mut().goto(near_meridian()), Err(MountError::Parked)));

        // Restart from the store
        let store = sim.into_ctrl().into_store();
        let mut c = ctrl_with(params(), store);
        assert_eq!(c.park_state(), ParkState::Parked);
        assert_eq!(c.axis(AxisId::Axis1).position(), -10_000);
        assert_eq!(c.axis(AxisId::Axis2).position(), 60_000);

        c.unpark().unwrap();
        assert_eq!(c.park_state(), ParkState::NotParked);
        assert!(c.axis(AxisId::Axis1).enabled());
        c.start_tracking().unwrap();
    }

    #[test]
    fn test_interrupted_park_reboots_unknown() {
        let mut store = MemStore::new();
        store::save(
            &mut store,
            KEY_PARK_POSITION,
            &ParkPosition {
                axis1_steps: -10_000,
                axis2_steps: 60_000,
            },
        )
        .unwrap();

        let mut sim = Simulator::new(ctrl_with(params(), Box::new(store)));
        sim.ctrl_mut().park().unwrap();
        sim.run_for(1.0).unwrap();
        assert_eq!(sim.ctrl().park_state(), ParkState::Parking);

        let store = sim.into_ctrl().into_store();
        let c = ctrl_with(params(), store);
        assert_eq!(c.park_state(), ParkState::ParkUnknown);
        assert_eq!(c.axis(AxisId::Axis2).position(), 90_000);
    }

    #[test]
    fn test_fault_during_park() {
        let mut sim = sim(params());
        sim.ctrl_mut()
            .goto(GotoTarget::Axes {
                axis1_deg: -10.0,
                axis2_deg: 60.0,
            })
            .unwrap();
        run_goto(&mut sim);
        sim.ctrl_mut().set_park().unwrap();
        sim.ctrl_mut().go_home().unwrap();
        run_goto(&mut sim);

        sim.ctrl_mut().park().unwrap();
        sim.run_for(1.0).unwrap();
        sim.pins_mut(AxisId::Axis2).fault = true;
        sim.run_for(0.1).unwrap();

        let c = sim.ctrl();
        assert_eq!(c.park_state(), ParkState::ParkFailed);
        assert_eq!(c.general_error(), GeneralError::MotorFault);
        assert_eq!(c.mode(), Mode::Off);

        // No retry, and nothing moves until the fault is reset
        let pos = c.axis(AxisId::Axis1).position();
        sim.run_for(2.0).unwrap();
        assert_eq!(sim.ctrl().axis(AxisId::Axis1).position(), pos);
        assert!(matches!(
            sim.ctrl_mut().start_tracking(),
            Err(MountError::MotorFault)
        ));

        sim.pins_mut(AxisId::Axis2).fault = false;
        sim.ctrl_mut().reset_fault();
        assert_eq!(sim.ctrl().general_error(), GeneralError::None);
        sim.ctrl_mut().park().unwrap();
        run_goto(&mut sim);
        assert_eq!(sim.ctrl().park_state(), ParkState::Parked);
    }

    #[test]
    fn test_guide_exclusive_through_mount() {
        let mut sim = sim(params());
        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut()
            .guide(AxisId::Axis1, GuideDir::Forward, None)
            .unwrap();

        assert!(matches!(
            sim.ctrl_mut().guide(AxisId::Axis1, GuideDir::Reverse, None),
            Err(MountError::AlreadyGuiding)
        ));
        let active = sim.ctrl().guide_blender().active(AxisId::Axis1).unwrap();
        assert_eq!(active.dir, GuideDir::Forward);

        // A guide in the other axis is independent
        sim.ctrl_mut()
            .guide(AxisId::Axis2, GuideDir::Reverse, Some(500))
            .unwrap();
        sim.run_for(1.0).unwrap();
        assert!(sim.ctrl().guide_blender().active(AxisId::Axis2).is_none());
        assert!(sim.ctrl().guide_blender().active(AxisId::Axis1).is_some());

        sim.ctrl_mut().stop_guide(None);
        assert!(!sim.ctrl().guide_blender().is_guiding());
    }

    #[test]
    fn test_pulse_guide_moves_axis2() {
        let mut sim = sim(params());
        let before = sim.ctrl().axis(AxisId::Axis2).target();

        // 1x sidereal for one second is 1000 / 240 steps
        sim.ctrl_mut().set_pulse_guide_rate(crate::guide::GUIDE_RATE_1X).unwrap();
        sim.ctrl_mut()
            .guide(AxisId::Axis2, GuideDir::Forward, Some(1000))
            .unwrap();
        sim.run_for(2.0).unwrap();

        let moved = (sim.ctrl().axis(AxisId::Axis2).target() - before).to_f64();
        assert!((moved - 1000.0 / 240.0).abs() < 0.2, "moved {}", moved);
        assert_eq!(sim.ctrl().mode(), Mode::Off);
    }

    #[test]
    fn test_sync_offsets_pointing() {
        let mut c = ctrl_with(params(), Box::new(MemStore::new()));
        let pos = c.axis(AxisId::Axis1).position();

        c.sync(GotoTarget::Equatorial {
            ha_deg: -20.0,
            dec_deg: 45.0,
            pier_side: None,
        })
        .unwrap();

        assert_eq!(c.axis(AxisId::Axis1).position(), pos);
        let s = c.status();
        assert!((s.ha_deg + 20.0).abs() < 1e-9);
        assert!((s.dec_deg - 45.0).abs() < 1e-9);

        // Home is an axis angle, the synced mount is no longer there
        assert!(!c.at_home());
    }

    #[test]
    fn test_settings_persist() {
        let mut c = ctrl_with(params(), Box::new(MemStore::new()));
        c.set_backlash(AxisId::Axis2, 40).unwrap();
        c.set_guide_rate(4).unwrap();
        let interval = c.adjust_sidereal_interval(-1000).unwrap();
        assert!(c.set_sidereal_interval(1).is_err());

        let c = ctrl_with(params(), c.into_store());
        assert_eq!(c.axis(AxisId::Axis2).backlash(), 40);
        assert_eq!(c.guide_blender().guide_rate(), 4);
        assert_eq!(c.clock().interval(), interval);
    }
}
