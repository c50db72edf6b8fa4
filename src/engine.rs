//! Engine orchestration
//!
//! `SleepEngine` is the public entry point: it owns the threshold model, the
//! motion gate, and the state machine, and funnels every mutation through
//! its methods so the host can treat it as a single-writer object.
//!
//! The host wires three cadences into it:
//! - sensor pushes (`on_heart_rate`, `on_motion`) update observed values
//!   only and never cause a transition;
//! - a 1 s tick (`tick_second`) advances the stillness counter;
//! - a 15 s tick (`tick`) performs the one transition evaluation per cycle,
//!   keeping the evaluation cadence independent of sensor callback jitter.
//!
//! Observability is a pollable [`EngineSnapshot`] plus a drainable event
//! queue; no reactive framework is assumed.

use crate::age::AgeBracket;
use crate::error::EngineError;
use crate::model::{is_night, ThresholdModel};
use crate::motion::{MotionGate, DEFAULT_MOTION_THRESHOLD};
use crate::state::SleepStateMachine;
use crate::store::{ModelStore, SettingsStore};
use crate::types::{
    EngineEvent, EngineSnapshot, HeartRateSample, SleepState, StatusClassification,
};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Engine tick cadence in seconds (transition evaluation)
pub const TICK_INTERVAL_SECS: u32 = 15;
/// Seconds of latched stillness required for the motion condition
pub const MOTION_STILL_THRESHOLD_SECS: u32 = 120;

/// Host-supplied engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wearer's age bracket; defaults Adult when age is unknown
    pub bracket: AgeBracket,
    /// Local UTC offset used for day/night classification
    pub local_offset: FixedOffset,
    /// Motion magnitude at or above which a sample counts as motion
    pub motion_threshold: f64,
    /// Seconds of stillness required for the motion condition
    pub motion_still_threshold_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bracket: AgeBracket::default(),
            local_offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            motion_still_threshold_secs: MOTION_STILL_THRESHOLD_SECS,
        }
    }
}

/// The personalized sleep-detection engine
pub struct SleepEngine {
    config: EngineConfig,
    model: ThresholdModel,
    gate: MotionGate,
    machine: SleepStateMachine,
    detecting: bool,
    /// Most recent heart-rate reading (bpm); 0.0 = none yet
    current_hr: f64,
    /// Resting heart rate from the heart-rate source; 0.0 = unavailable
    resting_hr: f64,
    /// Heart rates collected while sleep is detected, flushed on stop
    sample_buffer: Vec<f64>,
    events: Vec<EngineEvent>,
}

impl SleepEngine {
    /// Create an engine over the injected persistence port.
    ///
    /// Loads (and if needed migrates) the persisted threshold model.
    pub fn new(config: EngineConfig, store: Box<dyn SettingsStore>, now: DateTime<Utc>) -> Self {
        let model = ThresholdModel::new(
            config.bracket,
            ModelStore::new(store),
            config.local_offset,
            now,
        );
        let gate = MotionGate::new(config.motion_threshold);

        Self {
            config,
            model,
            gate,
            machine: SleepStateMachine::new(),
            detecting: false,
            current_hr: 0.0,
            resting_hr: 0.0,
            sample_buffer: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Record the resting heart rate reported by the heart-rate source.
    /// A zero reading means "unavailable" and is ignored.
    pub fn update_resting_heart_rate(&mut self, bpm: f64) {
        if bpm > 0.0 {
            self.resting_hr = bpm;
        }
    }

    /// Heart-rate push handler. Updates the observed value and, while sleep
    /// is detected, collects the reading for personalization. Never causes
    /// a state transition.
    pub fn on_heart_rate(&mut self, sample: HeartRateSample) {
        if sample.bpm <= 0.0 {
            return;
        }
        self.current_hr = sample.bpm;
        if self.detecting && self.machine.sleep_detected() {
            self.sample_buffer.push(sample.bpm);
        }
    }

    /// Motion push handler (~2 Hz fused magnitude). Never causes a state
    /// transition.
    pub fn on_motion(&mut self, magnitude: f64, now: DateTime<Utc>) {
        self.gate.observe(magnitude, now);
    }

    /// Advance the stillness counter; call once per second
    pub fn tick_second(&mut self) {
        self.gate.tick_second();
    }

    /// Begin tick-driven detection.
    ///
    /// Resets all transient detection state. Safe to call when no session is
    /// active. Fails when the heart-rate source has not produced a usable
    /// resting rate; detection then simply does not activate and the
    /// snapshot reports "waiting"; retry policy belongs to the caller.
    pub fn start_sleep_detection(&mut self, _now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.resting_hr <= 0.0 {
            return Err(EngineError::SourceUnavailable(
                "resting heart rate".to_string(),
            ));
        }
        self.machine.reset();
        self.gate.reset();
        self.sample_buffer.clear();
        self.detecting = true;
        Ok(())
    }

    /// Stop detection, flush collected samples into the threshold model, and
    /// reset transient state.
    ///
    /// Safe to call at any point, including when detection was never
    /// started. Once this returns, `tick` is a no-op until the next start,
    /// so a host timer that fires late cannot cause further transitions.
    pub fn stop_sleep_detection(&mut self, now: DateTime<Utc>) {
        self.detecting = false;

        if !self.sample_buffer.is_empty() {
            let night = is_night(now, self.config.local_offset);
            let buffer = std::mem::take(&mut self.sample_buffer);
            let updated = self.model.record_session(&buffer, self.resting_hr, night, now);
            if updated {
                self.events.push(EngineEvent::ThresholdsUpdated {
                    day_ratio: self.model.state().day_ratio,
                    night_ratio: self.model.state().night_ratio,
                    at: now,
                });
            }
        }
        self.machine.reset();
    }

    /// Perform one transition evaluation; call every 15 s while detecting.
    ///
    /// Returns the state after evaluation, or `None` when detection is
    /// inactive.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<SleepState> {
        if !self.detecting {
            return None;
        }

        let night = is_night(now, self.config.local_offset);
        let threshold = self.model.current_threshold(self.resting_hr, night, now);
        let hr_met = threshold > 0.0 && self.current_hr > 0.0 && self.current_hr < threshold;
        let motion_met = self
            .gate
            .has_been_still_for(self.config.motion_still_threshold_secs);

        let prev_state = self.machine.state();
        let prev_detected = self.machine.sleep_detected();
        let prev_disturbances = self.machine.disturbance_count();

        let state = self.machine.evaluate(hr_met, motion_met, now);

        if !prev_detected && self.machine.sleep_detected() {
            self.events.push(EngineEvent::SleepDetected { at: now });
        }
        if self.machine.disturbance_count() > prev_disturbances {
            self.events.push(EngineEvent::DisturbanceStarted {
                at: now,
                count: self.machine.disturbance_count(),
            });
        }
        if prev_detected && !self.machine.sleep_detected() {
            self.events.push(EngineEvent::SleepEnded { at: now });
        }
        if state != prev_state {
            self.events.push(EngineEvent::StateChanged {
                from: prev_state,
                to: state,
                at: now,
            });
        }

        Some(state)
    }

    /// Swap the age bracket used for default thresholds; already-learned
    /// ratios are not rewritten.
    pub fn set_age_bracket(&mut self, bracket: AgeBracket) {
        self.model.set_bracket(bracket);
    }

    /// Inform the engine that a nap countdown is (or is no longer) running
    pub fn set_countdown_active(&mut self, active: bool) {
        self.machine.set_countdown_active(active);
    }

    /// Activity-adjustment hook: intense activity temporarily raises the day
    /// threshold ratio.
    pub fn record_activity_level(&mut self, level: f64, now: DateTime<Utc>) {
        self.model.adjust_for_activity(level, self.resting_hr, now);
    }

    /// Diagnostic: reset the personalization model to bracket defaults
    pub fn reset_model(&mut self, now: DateTime<Utc>) {
        self.model.reset(now);
    }

    /// Pollable snapshot of the observable fields
    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        let night = is_night(now, self.config.local_offset);
        EngineSnapshot {
            state: self.machine.state(),
            sleep_detected: self.machine.sleep_detected(),
            sleep_start: self.machine.sleep_start(),
            disturbance_count: self.machine.disturbance_count(),
            threshold_ratio: self.model.active_ratio(night, now),
            threshold_bpm: self.model.current_threshold(self.resting_hr, night, now),
            status: self.status(),
        }
    }

    /// Drain events accumulated since the last call
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_detecting(&self) -> bool {
        self.detecting
    }

    pub fn model(&self) -> &ThresholdModel {
        &self.model
    }

    fn status(&self) -> StatusClassification {
        if !self.detecting || self.resting_hr <= 0.0 {
            return StatusClassification::Waiting;
        }
        match self.machine.state() {
            SleepState::Awake if self.machine.sleep_detected() => {
                StatusClassification::TimerContinuing
            }
            SleepState::Awake => StatusClassification::Monitoring,
            SleepState::PotentialSleep => StatusClassification::NearSleep,
            SleepState::Asleep => StatusClassification::Sleeping,
            SleepState::Disturbed => StatusClassification::Disturbed,
        }
    }
}

/// Thread-safe handle for hosts whose tick timer and sensor callbacks run on
/// different execution contexts.
///
/// All mutation still funnels through `SleepEngine`'s methods; the mutex is
/// the single serialization point.
#[derive(Clone)]
pub struct SharedSleepEngine {
    inner: Arc<Mutex<SleepEngine>>,
}

impl SharedSleepEngine {
    pub fn new(engine: SleepEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Lock the engine. A poisoned lock is recovered rather than propagated:
    /// engine state is value-typed and remains internally consistent.
    pub fn lock(&self) -> MutexGuard<'_, SleepEngine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
