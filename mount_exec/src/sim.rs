//! # Simulated mount hardware
//!
//! Deterministic stand-ins for the step/dir pins and hardware timers, and a [`Simulator`] which
//! runs the axis and clock interrupts and the mount control main loop against a simulated
//! timebase.
//!
//! Time is kept in timer ticks (1/16 us). Each interrupt's next firing is whatever its handler
//! last programmed. When several events fall on the same tick the axis interrupts run first,
//! then the clock interrupt, the PPS edge and finally the main loop pass.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;

use crate::{
    axis::{AxisId, AxisIsr, NUM_AXES},
    clock::ClockIsr,
    hal::{Direction, HwTimer, MicrosClock, StepDirPins, TIMER_TICKS_PER_S, TIMER_TICKS_PER_US},
    mount_ctrl::{GeneralError, InputData, MountCtrl, MountError, MountStatus, StatusReport},
    pec::PecEvent,
};
use util::module::State;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default main loop period.
///
/// Units: timer ticks
pub const MAIN_PERIOD_TICKS: u64 = 1_000 * TIMER_TICKS_PER_US;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Hardware timer which records the period it was last programmed with.
#[derive(Debug, Default)]
pub struct SimTimer {
    next: Option<u64>,

    /// Number of times the timer has been programmed.
    pub programmed: u64,
}

/// Step/dir pins which count what they are asked to do.
#[derive(Debug)]
pub struct SimPins {
    pub pulses: u64,
    pub dir: Direction,
    pub dir_changes: u32,

    /// Level of the simulated driver fault line.
    pub fault: bool,
    pub enabled: bool,
}

/// Events seen across a simulation run.
#[derive(Debug, Default, Clone)]
pub struct SimLog {
    pub passes: u64,
    pub gotos_completed: u32,
    pub flips_started: u32,
    pub halts: Vec<GeneralError>,
    pub pec_events: Vec<PecEvent>,
    pub pec_incomplete: u32,
}

/// PPS source with a period measured in local timer ticks.
#[derive(Debug, Clone, Copy)]
struct SimPps {
    period: u64,
    next: u64,
}

/// Runs a [`MountCtrl`] and its interrupts in simulated time.
pub struct Simulator {
    ctrl: MountCtrl,
    axes: Vec<AxisIsr<SimTimer, SimPins>>,
    clock: ClockIsr<SimTimer>,

    now: u64,
    next_axis: [u64; NUM_AXES],
    next_clock: u64,
    next_main: u64,
    main_period: u64,

    pps: Option<SimPps>,

    /// Worm rotation the axis 1 position was in at the last pass.
    worm_rotation: Option<i64>,

    status: MountStatus,
    log: SimLog,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimTimer {
    /// Take the period the timer was last programmed with.
    pub fn take(&mut self) -> Option<u64> {
        self.next.take()
    }
}

impl HwTimer for SimTimer {
    fn program_next(&mut self, ticks: u64) {
        self.next = Some(ticks.max(1));
        self.programmed += 1;
    }
}

impl Default for SimPins {
    fn default() -> Self {
        Self {
            pulses: 0,
            dir: Direction::Forward,
            dir_changes: 0,
            fault: false,
            enabled: false,
        }
    }
}

impl StepDirPins for SimPins {
    fn set_direction(&mut self, dir: Direction) {
        self.dir = dir;
        self.dir_changes += 1;
    }

    fn pulse(&mut self) {
        self.pulses += 1;
    }

    fn fault_asserted(&self) -> bool {
        self.fault
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl MicrosClock for Simulator {
    fn micros(&self) -> u32 {
        (self.now / TIMER_TICKS_PER_US) as u32
    }
}

impl Simulator {
    pub fn new(ctrl: MountCtrl) -> Self {
        let axes: Vec<_> = AxisId::ALL
            .iter()
            .map(|id| {
                let invert = match id {
                    AxisId::Axis1 => ctrl.params().axis1.reverse,
                    AxisId::Axis2 => ctrl.params().axis2.reverse,
                };
                AxisIsr::new(
                    ctrl.axis_shared(*id),
                    SimTimer::default(),
                    SimPins::default(),
                    invert,
                )
            })
            .collect();

        let clock = ClockIsr::new(ctrl.clock_shared(), SimTimer::default());

        let next_axis = [
            ctrl.axis(AxisId::Axis1).timer_rate(),
            ctrl.axis(AxisId::Axis2).timer_rate(),
        ];
        let next_clock = clock.next_period();
        let status = ctrl.status();

        Self {
            ctrl,
            axes,
            clock,
            now: 0,
            next_axis,
            next_clock,
            next_main: MAIN_PERIOD_TICKS,
            main_period: MAIN_PERIOD_TICKS,
            pps: None,
            worm_rotation: None,
            status,
            log: SimLog::default(),
        }
    }

    /// Start a PPS signal. `drift_ppm` is how fast the local oscillator runs against GPS time,
    /// a positive drift makes each second last more timer ticks.
    pub fn enable_pps(&mut self, drift_ppm: f64) {
        let period = (TIMER_TICKS_PER_S as f64 * (1.0 + drift_ppm * 1e-6)).round() as u64;
        self.pps = Some(SimPps {
            period,
            next: self.now + period,
        });
    }

    pub fn disable_pps(&mut self) {
        self.pps = None;
    }

    pub fn set_main_period_us(&mut self, period_us: u64) {
        self.main_period = (period_us * TIMER_TICKS_PER_US).max(1);
    }

    pub fn ctrl(&self) -> &MountCtrl {
        &self.ctrl
    }

    pub fn ctrl_mut(&mut self) -> &mut MountCtrl {
        &mut self.ctrl
    }

    pub fn into_ctrl(self) -> MountCtrl {
        self.ctrl
    }

    pub fn pins(&self, id: AxisId) -> &SimPins {
        self.axes[id.index()].pins()
    }

    pub fn pins_mut(&mut self, id: AxisId) -> &mut SimPins {
        self.axes[id.index()].pins_mut()
    }

    /// Status from the most recent main loop pass.
    pub fn status(&self) -> &MountStatus {
        &self.status
    }

    pub fn log(&self) -> &SimLog {
        &self.log
    }

    /// Simulated time since the start.
    pub fn now_s(&self) -> f64 {
        self.now as f64 / TIMER_TICKS_PER_S as f64
    }

    pub fn now_us(&self) -> u32 {
        self.micros()
    }

    /// Run for a span of simulated time.
    pub fn run_for(&mut self, seconds: f64) -> Result<(), MountError> {
        let end = self.now + (seconds * TIMER_TICKS_PER_S as f64) as u64;
        while self.next_event() <= end {
            self.step()?;
        }
        self.now = end;
        Ok(())
    }

    /// Run until `done` holds after a main loop pass, or the timeout passes. Returns whether
    /// `done` was met.
    pub fn run_until<F>(&mut self, mut done: F, timeout_s: f64) -> Result<bool, MountError>
    where
        F: FnMut(&MountCtrl) -> bool,
    {
        let end = self.now + (timeout_s * TIMER_TICKS_PER_S as f64) as u64;
        while self.next_event() <= end {
            if self.step()? && done(&self.ctrl) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next_event(&self) -> u64 {
        let mut next = self.next_clock.min(self.next_main);
        for t in self.next_axis.iter() {
            next = next.min(*t);
        }
        if let Some(pps) = self.pps {
            next = next.min(pps.next);
        }
        next
    }

    /// Advance to the next event and service everything due then. Returns `true` if a main
    /// loop pass ran.
    pub fn step(&mut self) -> Result<bool, MountError> {
        let t = self.next_event();
        self.now = t;

        for (i, isr) in self.axes.iter_mut().enumerate() {
            if self.next_axis[i] == t {
                isr.tick();
                let period = isr
                    .timer_mut()
                    .take()
                    .unwrap_or_else(|| isr.shared().timer_rate());
                self.next_axis[i] = t + period.max(1);
            }
        }

        if self.next_clock == t {
            self.clock.tick();
            let period = self
                .clock
                .timer_mut()
                .take()
                .unwrap_or_else(|| self.clock.next_period());
            self.next_clock = t + period.max(1);
        }

        if let Some(pps) = self.pps.as_mut() {
            if pps.next == t {
                pps.next += pps.period;
                let now_us = self.micros();
                self.clock.pps_edge(now_us);
            }
        }

        if self.next_main == t {
            self.next_main = t + self.main_period;
            self.main_pass()?;
            return Ok(true);
        }

        Ok(false)
    }

    fn main_pass(&mut self) -> Result<(), MountError> {
        let input = InputData {
            now_us: self.now_us(),
            worm_sense: self.worm_sense(),
        };

        let (status, report) = self.ctrl.proc(&input)?;
        self.status = status;
        self.record(&report);

        // An axis idling at a slow rate picks up a faster one straight away
        for (i, id) in AxisId::ALL.iter().enumerate() {
            let rate = self.ctrl.axis(*id).timer_rate();
            if self.now + rate < self.next_axis[i] {
                self.next_axis[i] = self.now + rate;
            }
        }

        Ok(())
    }

    /// Simulated worm index sensor, triggering once per worm rotation of axis 1.
    fn worm_sense(&mut self) -> bool {
        let pec = &self.ctrl.params().pec;
        if !pec.sense_fitted || pec.worm_rotation_steps == 0 {
            return false;
        }

        let rotation = (self.ctrl.axis(AxisId::Axis1).position() as i64)
            .div_euclid(pec.worm_rotation_steps as i64);
        let sensed = matches!(self.worm_rotation, Some(r) if r != rotation);
        self.worm_rotation = Some(rotation);
        sensed
    }

    fn record(&mut self, report: &StatusReport) {
        let log = &mut self.log;
        log.passes += 1;

        if report.goto_completed {
            log.gotos_completed += 1;
        }
        if report.flip_started {
            log.flips_started += 1;
        }
        if let Some(e) = report.tracking_halted {
            log.halts.push(e);
        }
        if let Some(e) = report.pec_event {
            log.pec_events.push(e);
        }
        if report.pec_incomplete {
            log.pec_incomplete += 1;
        }

        if report.goto_completed || report.flip_started || report.tracking_halted.is_some() {
            trace!("{:.3} s: {:?}", self.now_s(), report);
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
        mount_ctrl::{Mode, MountCtrlParams, MountInit},
        pec::{PecParams, PecStatus},
        store::MemStore,
    };

    fn ctrl(params: MountCtrlParams) -> MountCtrl {
        MountCtrl::init(MountInit {
            params,
            store: Box::new(MemStore::new()),
        })
        .unwrap()
    }

    #[test]
    fn test_clock_runs_at_sidereal_rate() {
        let mut sim = Simulator::new(ctrl(MountCtrlParams::default()));
        sim.run_for(10.0).unwrap();

        // 10 solar seconds is 10.0274 sidereal seconds
        let ticks = sim.ctrl().clock().ticks();
        assert!(ticks >= 1002 && ticks <= 1003, "ticks {}", ticks);
        assert_eq!(sim.log().passes, 10_000);
    }

    #[test]
    fn test_tracking_step_count() {
        let mut sim = Simulator::new(ctrl(MountCtrlParams::default()));
        sim.ctrl_mut().start_tracking().unwrap();
        let start = sim.ctrl().axis(AxisId::Axis1).position();
        sim.run_for(60.0).unwrap();

        // 12800 steps per degree, 1/240 degree per sidereal second
        let expected = 60.0 * 1.002_737_9 * 12_800.0 / 240.0;
        let moved = (sim.ctrl().axis(AxisId::Axis1).position() - start) as f64;
        assert!((moved - expected).abs() <= 2.0, "moved {} expected {}", moved, expected);
        assert_eq!(sim.pins(AxisId::Axis2).pulses, 0);
    }

    #[test]
    fn test_pps_correction_is_bounded() {
        let mut params = MountCtrlParams::default();
        params.clock.max_ratio_step = 1e-6;
        let mut sim = Simulator::new(ctrl(params));
        let nominal = sim.ctrl().clock().interval();

        sim.enable_pps(20.0);
        sim.run_for(5.0).unwrap();
        // At most one bounded step per second of updates so far
        let ratio = sim.ctrl().clock().pps_ratio();
        assert!((1.0 - ratio).abs() <= 6e-6, "ratio {}", ratio);

        sim.run_for(120.0).unwrap();
        let corrected = sim.ctrl().clock().ratio_corrected_interval();
        let expected = nominal as f64 * (1.0 + 20e-6);
        assert!((corrected as f64 - expected).abs() < 50.0);
        assert_eq!(sim.status().corrected_interval, corrected);
    }

    #[test]
    fn test_pec_record_then_play() {
        let params = MountCtrlParams {
            axis1: AxisParams {
                steps_per_degree: 240.0,
                min_deg: -200.0,
                max_deg: 200.0,
                ..AxisParams::default()
            },
            pec: PecParams {
                worm_rotation_steps: 20,
                capacity: 64,
                sense_fitted: true,
                index_guard_s: 5.0,
            },
            ..MountCtrlParams::default()
        };
        // One step per sidereal second, a worm rotation every 20 seconds
        let mut sim = Simulator::new(ctrl(params));
        sim.ctrl_mut().start_tracking().unwrap();
        sim.ctrl_mut().pec_record().unwrap();

        let recorded = sim
            .run_until(|c| c.pec().recorded(), 90.0)
            .unwrap();
        assert!(recorded);
        assert_eq!(sim.ctrl().pec().status(), PecStatus::ReadyPlay);
        assert_eq!(sim.log().pec_incomplete, 0);
        assert!(sim.log().pec_events.contains(&PecEvent::Recorded));

        sim.ctrl_mut().pec_play().unwrap();
        let playing = sim
            .run_until(|c| c.pec().status() == PecStatus::Play, 30.0)
            .unwrap();
        assert!(playing);
        assert_eq!(sim.ctrl().mode(), Mode::Sidereal);
    }
}
