//! # Periodic error correction
//!
//! The PEC table holds one signed correction per sidereal second of worm rotation, in axis 1
//! steps. Recording sums the guide corrections applied to axis 1 over each entry, playback feeds
//! the stored value back as an extra axis 1 rate.
//!
//! The table index is derived from the axis 1 position written by the axis interrupt, so the
//! correction stays locked to the motion that produced it. A worm index sensor, if fitted,
//! re-anchors the index once per rotation.
//!
//! ```text
//! Ignore -> ReadyPlay -> Play
//! Ignore -> ReadyRecord -> Record -> ReadyPlay
//! ```

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{ticks_since, TICKS_PER_SECOND};
pub use params::PecParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Entries a full record pass waits for a trailing worm index pulse before it is incomplete.
const SENSE_GRACE_ENTRIES: usize = 3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The PEC engine.
#[derive(Debug, Clone)]
pub struct PecEngine {
    params: PecParams,

    /// Axis 1 steps per sidereal second, the span of one table entry.
    steps_per_second: f64,

    /// Entries in one worm rotation.
    len: usize,

    buffer: Vec<i8>,
    status: PecStatus,
    recorded: bool,

    /// Axis 1 position of index 0.
    anchor: i32,
    index: usize,

    index_sense_detected: bool,
    last_sense_tick: Option<u32>,

    recording: Option<Recording>,
}

/// In-progress record pass. Entries go to a scratch copy of the table which is only committed
/// when the pass completes.
#[derive(Debug, Clone)]
struct Recording {
    buffer: Vec<i8>,
    acc_steps: f64,
    entries: usize,
    first_pass: bool,
    sense_seen: bool,
    last_index: usize,

    /// Entries passed since the table filled, while waiting for a late index pulse.
    overrun: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PecStatus {
    Ignore,
    ReadyPlay,
    Play,
    ReadyRecord,
    Record,
}

/// Notable transitions reported by [`PecEngine::service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PecEvent {
    PlayStarted,
    RecordStarted,

    /// A record pass completed and the table was committed.
    Recorded,
}

#[derive(Debug, thiserror::Error)]
pub enum PecError {
    #[error("PEC table needs {0} entries but has capacity for {1}")]
    TableFull(usize, usize),

    #[error("PEC record pass finished without a second worm index detection")]
    Incomplete,

    #[error("No PEC table has been recorded")]
    NotRecorded,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PecStatus {
    fn default() -> Self {
        PecStatus::Ignore
    }
}

impl Recording {
    /// Close the `advanced` entries from `last_index` onwards, sharing the accumulated guide
    /// steps between them. Stops at a full table.
    fn write(&mut self, advanced: usize) {
        let len = self.buffer.len();
        let share = self.acc_steps / advanced as f64;
        let new = share.round().max(i8::MIN as f64).min(i8::MAX as f64) as i8;

        for k in 0..advanced.min(len - self.entries) {
            let slot = &mut self.buffer[(self.last_index + k) % len];
            *slot = match self.first_pass {
                true => new,
                false => ((2 * *slot as i16 + new as i16) / 3) as i8,
            };
            self.entries += 1;
        }
    }
}

impl PecEngine {
    /// Create the engine for an axis 1 tracking rate of `steps_per_second`.
    pub fn new(params: PecParams, steps_per_second: f64) -> Self {
        let sps = steps_per_second.max(f64::MIN_POSITIVE);
        let len = ((params.worm_rotation_steps as f64 / sps).ceil() as usize).max(1);
        let buffer = vec![0; len.min(params.capacity.max(1))];

        Self {
            params,
            steps_per_second: sps,
            len,
            buffer,
            status: PecStatus::Ignore,
            recorded: false,
            anchor: 0,
            index: 0,
            index_sense_detected: false,
            last_sense_tick: None,
            recording: None,
        }
    }

    /// Restore a stored table. A table of the wrong length (a different worm or gearing) is
    /// discarded.
    pub fn load(&mut self, table: Vec<i8>, recorded: bool) {
        if table.len() != self.buffer.len() || self.table_fits().is_err() {
            warn!(
                "Stored PEC table has {} entries, expected {}, discarding",
                table.len(),
                self.buffer.len()
            );
            return;
        }
        self.buffer = table;
        self.recorded = recorded;
    }

    fn table_fits(&self) -> Result<(), PecError> {
        if self.len > self.params.capacity {
            return Err(PecError::TableFull(self.len, self.params.capacity));
        }
        Ok(())
    }

    pub fn status(&self) -> PecStatus {
        self.status
    }

    pub fn recorded(&self) -> bool {
        self.recorded
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn index_sense_detected(&self) -> bool {
        self.index_sense_detected
    }

    pub fn table(&self) -> &[i8] {
        &self.buffer
    }

    pub fn start_play(&mut self) -> Result<(), PecError> {
        self.table_fits()?;
        if !self.recorded {
            return Err(PecError::NotRecorded);
        }
        self.recording = None;
        self.status = PecStatus::ReadyPlay;
        Ok(())
    }

    pub fn start_record(&mut self) -> Result<(), PecError> {
        self.table_fits()?;
        self.recording = None;
        self.status = PecStatus::ReadyRecord;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.status != PecStatus::Ignore {
            info!("PEC stopped");
        }
        self.recording = None;
        self.status = PecStatus::Ignore;
    }

    pub fn clear(&mut self) {
        self.stop();
        for e in self.buffer.iter_mut() {
            *e = 0;
        }
        self.recorded = false;
    }

    /// Worm index pulse observed with axis 1 at `position`. Returns `true` if the pulse was
    /// accepted, pulses within the guard window of the previous one are ignored.
    pub fn sense(&mut self, position: i32, now_tick: u32) -> bool {
        let guard = (self.params.index_guard_s * TICKS_PER_SECOND as f64) as u32;
        if let Some(last) = self.last_sense_tick {
            if ticks_since(now_tick, last) < guard {
                debug!("Ignoring worm index pulse inside the guard window");
                return false;
            }
        }

        self.last_sense_tick = Some(now_tick);
        self.anchor = position;
        self.index_sense_detected = true;

        if let Some(rec) = self.recording.as_mut() {
            rec.sense_seen = true;
        }

        true
    }

    /// Table index for an axis 1 position.
    pub fn index_at(&self, position: i32) -> usize {
        let worm = self.params.worm_rotation_steps.max(1) as i64;
        let offset = (position as i64 - self.anchor as i64).rem_euclid(worm);
        let i = (offset as f64 / self.steps_per_second).floor() as usize;
        i.min(self.buffer.len() - 1)
    }

    /// Main loop processing.
    ///
    /// # Inputs
    /// - `position`: axis 1 position.
    /// - `tracking`: whether the mount is tracking at the sidereal rate. Playback and recording
    ///   are suspended otherwise.
    /// - `guide_steps`: axis 1 guide steps applied since the last call.
    pub fn service(
        &mut self,
        position: i32,
        tracking: bool,
        guide_steps: f64,
    ) -> Result<Option<PecEvent>, PecError> {
        let index = self.index_at(position);

        if !tracking {
            match self.status {
                PecStatus::Play => self.status = PecStatus::ReadyPlay,
                PecStatus::Record => {
                    info!("PEC recording interrupted, will restart at the next index");
                    self.recording = None;
                    self.status = PecStatus::ReadyRecord;
                }
                _ => (),
            }
            self.index = index;
            return Ok(None);
        }

        let at_start = match self.params.sense_fitted {
            true => std::mem::replace(&mut self.index_sense_detected, false),
            false => index == 0 && self.index != 0,
        };

        let mut event = None;

        match self.status {
            PecStatus::ReadyPlay if at_start => {
                info!("PEC playback started");
                self.status = PecStatus::Play;
                event = Some(PecEvent::PlayStarted);
            }
            PecStatus::ReadyRecord if at_start => {
                info!("PEC recording started");
                self.status = PecStatus::Record;
                self.recording = Some(Recording {
                    buffer: self.buffer.clone(),
                    acc_steps: 0.0,
                    entries: 0,
                    first_pass: !self.recorded,
                    sense_seen: false,
                    last_index: index,
                    overrun: 0,
                });
                event = Some(PecEvent::RecordStarted);
            }
            PecStatus::Record => {
                let result = self.record(index, guide_steps);
                self.index = index;
                return result;
            }
            _ => (),
        }

        self.index = index;
        Ok(event)
    }

    fn record(&mut self, index: usize, guide_steps: f64) -> Result<Option<PecEvent>, PecError> {
        let rec = match self.recording.as_mut() {
            Some(r) => r,
            None => {
                self.status = PecStatus::ReadyRecord;
                return Ok(None);
            }
        };
        let len = rec.buffer.len();

        rec.acc_steps += guide_steps;
        if index != rec.last_index {
            let advanced = (index + len - rec.last_index) % len;

            // Moving backwards keeps accumulating into the entry being recorded
            if advanced <= len / 2 {
                if rec.entries < len {
                    rec.write(advanced);
                } else {
                    rec.overrun += advanced;
                }
                rec.acc_steps = 0.0;
            }
            rec.last_index = index;
        }

        if rec.entries < len {
            return Ok(None);
        }

        if self.params.sense_fitted && !rec.sense_seen {
            if rec.overrun <= SENSE_GRACE_ENTRIES {
                return Ok(None);
            }
            self.recording = None;
            warn!("PEC record pass incomplete, no second worm index pulse");
            self.status = PecStatus::Ignore;
            return Err(PecError::Incomplete);
        }

        if let Some(rec) = self.recording.take() {
            self.buffer = rec.buffer;
        }
        self.recorded = true;
        self.status = PecStatus::ReadyPlay;
        info!("PEC recording complete");

        Ok(Some(PecEvent::Recorded))
    }

    /// Correction rate for axis 1 in sidereal multiples, zero unless playing.
    pub fn rate_multiple(&self) -> f64 {
        match self.status {
            PecStatus::Play => self.buffer[self.index] as f64 / self.steps_per_second,
            _ => 0.0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// 10 axis 1 steps per sidereal second, 100 step worm: a 10 entry table.
    const SPS: f64 = 10.0;

    fn params(sense_fitted: bool) -> PecParams {
        PecParams {
            worm_rotation_steps: 100,
            capacity: 16,
            sense_fitted,
            index_guard_s: 5.0,
        }
    }

    /// Per entry periodic error, in steps.
    const PATTERN: [i8; 10] = [3, 5, 2, -1, -4, -6, -3, 0, 2, 4];

    /// Track one step per call (a tenth of a second) applying the guide correction the pattern
    /// calls for over that step, returning events and the play rate at each step.
    fn track(pec: &mut PecEngine, pos: &mut i32, steps: usize) -> (Vec<PecEvent>, Vec<f64>) {
        let mut events = Vec::new();
        let mut rates = Vec::new();
        for _ in 0..steps {
            let guide = PATTERN[pec.index_at(*pos)] as f64 / SPS;
            *pos += 1;
            if let Some(e) = pec.service(*pos, true, guide).unwrap() {
                events.push(e);
            }
            rates.push(pec.rate_multiple());
        }
        (events, rates)
    }

    #[test]
    fn test_table_full() {
        let mut pec = PecEngine::new(
            PecParams {
                capacity: 5,
                ..params(false)
            },
            SPS,
        );
        match pec.start_record() {
            Err(PecError::TableFull(10, 5)) => (),
            r => panic!("expected TableFull, got {:?}", r),
        }
        assert!(pec.index_at(95) < 5);
    }

    #[test]
    fn test_index_wraps() {
        let pec = PecEngine::new(params(false), SPS);
        assert_eq!(pec.index_at(0), 0);
        assert_eq!(pec.index_at(99), 9);
        assert_eq!(pec.index_at(100), 0);
        assert_eq!(pec.index_at(-1), 9);
        assert_eq!(pec.index_at(1_000_055), 5);
    }

    #[test]
    fn test_play_requires_recording() {
        let mut pec = PecEngine::new(params(false), SPS);
        assert!(matches!(pec.start_play(), Err(PecError::NotRecorded)));
    }

    #[test]
    fn test_record_play_round_trip() {
        let mut pec = PecEngine::new(params(false), SPS);
        let mut pos = 50;

        pec.start_record().unwrap();
        let (events, _) = track(&mut pec, &mut pos, 200);
        assert_eq!(events, vec![PecEvent::RecordStarted, PecEvent::Recorded]);
        assert!(pec.recorded());
        assert_eq!(pec.table(), &PATTERN[..]);

        // Playback reproduces the same corrections on every rotation
        let (events, rates) = track(&mut pec, &mut pos, 300);
        assert_eq!(events, vec![PecEvent::PlayStarted]);
        let played: Vec<f64> = rates.into_iter().skip_while(|r| *r == 0.0).collect();
        assert!(played.len() >= 200);
        for (k, r) in played[..200].iter().enumerate() {
            assert_eq!(*r, played[k % 100]);
        }
        let expected: Vec<f64> = PATTERN.iter().map(|p| *p as f64 / SPS).collect();
        assert!(played[..100].iter().all(|r| expected.contains(r)));

        // Re-recording the same error leaves the table unchanged
        pec.start_record().unwrap();
        let (events, _) = track(&mut pec, &mut pos, 200);
        assert!(events.contains(&PecEvent::Recorded));
        assert_eq!(pec.table(), &PATTERN[..]);
    }

    #[test]
    fn test_incomplete_without_second_index() {
        let mut pec = PecEngine::new(params(true), SPS);
        let mut pos = 0;

        pec.start_record().unwrap();
        assert!(pec.sense(pos, 0));
        assert_eq!(pec.service(pos, true, 0.0).unwrap(), Some(PecEvent::RecordStarted));

        let mut result = Ok(None);
        for _ in 0..150 {
            pos += 1;
            result = pec.service(pos, true, 0.5);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(PecError::Incomplete)));
        assert!(!pec.recorded());
        assert_eq!(pec.status(), PecStatus::Ignore);
        assert!(pec.table().iter().all(|e| *e == 0));
    }

    #[test]
    fn test_complete_with_index_each_rotation() {
        let mut pec = PecEngine::new(params(true), SPS);
        let mut pos = 0;
        let mut tick = 0u32;

        pec.start_record().unwrap();
        pec.sense(pos, tick);
        pec.service(pos, true, 0.0).unwrap();

        let mut recorded = false;
        for _ in 0..100 {
            pos += 1;
            tick += 10;
            if pos % 100 == 0 {
                assert!(pec.sense(pos, tick));
            }
            if let Some(PecEvent::Recorded) = pec.service(pos, true, 0.5).unwrap() {
                recorded = true;
            }
        }
        assert!(recorded);
        assert!(pec.table().iter().all(|e| *e == 5));
    }

    /// Record with a constant half step of guiding per step, the second index pulse arriving
    /// at `pulse_pos`.
    fn record_with_pulse_at(pulse_pos: i32) -> (PecEngine, Vec<PecEvent>) {
        let mut pec = PecEngine::new(params(true), SPS);
        let mut pos = 0;
        let mut tick = 0u32;
        let mut events = Vec::new();

        pec.start_record().unwrap();
        pec.sense(pos, tick);
        pec.service(pos, true, 0.0).unwrap();

        for _ in 0..130 {
            pos += 1;
            tick += 10;
            if pos == pulse_pos {
                assert!(pec.sense(pos, tick));
            }
            if let Some(e) = pec.service(pos, true, 0.5).unwrap() {
                events.push(e);
            }
        }
        (pec, events)
    }

    #[test]
    fn test_late_index_pulse_completes() {
        let (pec, events) = record_with_pulse_at(102);
        assert_eq!(events, vec![PecEvent::Recorded]);
        assert!(pec.recorded());
        assert_eq!(pec.status(), PecStatus::ReadyPlay);
        assert!(pec.table().iter().all(|e| *e == 5));
    }

    #[test]
    fn test_early_index_pulse_completes() {
        let (pec, events) = record_with_pulse_at(97);
        assert_eq!(events, vec![PecEvent::Recorded]);
        assert!(pec.recorded());
        assert!(pec.table()[..9].iter().all(|e| *e == 5));

        // The last entry only saw 7 steps of guiding
        assert_eq!(pec.table()[9], 4);
    }

    #[test]
    fn test_index_skipping_entries_fills_them() {
        let mut pec = PecEngine::new(params(false), SPS);
        pec.start_record().unwrap();
        pec.service(95, true, 0.0).unwrap();
        assert_eq!(pec.service(100, true, 0.0).unwrap(), Some(PecEvent::RecordStarted));

        // A long pass moves the index on three entries at once
        pec.service(130, true, 3.0).unwrap();
        let rec = pec.recording.as_ref().unwrap();
        assert_eq!(rec.entries, 3);
        assert_eq!(&rec.buffer[..4], &[1, 1, 1, 0]);
    }

    #[test]
    fn test_sense_guard() {
        let mut pec = PecEngine::new(params(true), SPS);
        assert!(pec.sense(10, 1000));
        assert!(!pec.sense(12, 1000 + 499));
        assert_eq!(pec.index_at(10), 0);
        assert!(pec.sense(12, 1000 + 500));
        assert_eq!(pec.index_at(12), 0);
    }

    #[test]
    fn test_suspended_when_not_tracking() {
        let mut pec = PecEngine::new(params(false), SPS);
        let mut pos = 50;
        pec.start_record().unwrap();
        track(&mut pec, &mut pos, 200);
        track(&mut pec, &mut pos, 60);
        assert_eq!(pec.status(), PecStatus::Play);

        pec.service(pos, false, 0.0).unwrap();
        assert_eq!(pec.status(), PecStatus::ReadyPlay);
        assert_eq!(pec.rate_multiple(), 0.0);
    }
}
