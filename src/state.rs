//! Sleep state machine
//!
//! Level-triggered four-state machine evaluated once per engine tick from
//! two boolean conditions: heart rate below the personalized threshold, and
//! sustained stillness. Once sleep is detected the machine is sticky:
//! partial condition loss never flips the state, and full loss is tolerated
//! as a disturbance for a bounded window before the wearer is considered
//! awake.

use crate::types::{DisturbanceEpisode, SleepState};
use chrono::{DateTime, Utc};

/// Seconds a disturbance is tolerated before it counts as waking
pub const MAX_DISTURBANCE_SECS: i64 = 60;

/// The central detection state machine
#[derive(Debug, Clone)]
pub struct SleepStateMachine {
    state: SleepState,
    sleep_detected: bool,
    sleep_start: Option<DateTime<Utc>>,
    episode: Option<DisturbanceEpisode>,
    disturbance_count: u32,
    /// Set by the host when a nap countdown is already running; an over-long
    /// disturbance then surfaces Awake without resetting sleep tracking
    countdown_active: bool,
    max_disturbance_secs: i64,
}

impl Default for SleepStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepStateMachine {
    pub fn new() -> Self {
        Self {
            state: SleepState::Awake,
            sleep_detected: false,
            sleep_start: None,
            episode: None,
            disturbance_count: 0,
            countdown_active: false,
            max_disturbance_secs: MAX_DISTURBANCE_SECS,
        }
    }

    /// Evaluate one tick from the two level-triggered conditions.
    ///
    /// Before sleep is detected: both conditions met transitions straight to
    /// Asleep and records the onset; exactly one met is PotentialSleep;
    /// neither is Awake. After detection the machine only reacts to full
    /// condition loss (disturbance handling) or full recovery (episode
    /// closed, back to Asleep).
    pub fn evaluate(
        &mut self,
        hr_met: bool,
        motion_met: bool,
        now: DateTime<Utc>,
    ) -> SleepState {
        if !self.sleep_detected {
            self.state = match (hr_met, motion_met) {
                (true, true) => {
                    self.sleep_detected = true;
                    self.sleep_start = Some(now);
                    SleepState::Asleep
                }
                (false, false) => SleepState::Awake,
                _ => SleepState::PotentialSleep,
            };
            return self.state;
        }

        match (hr_met, motion_met) {
            (true, true) => {
                self.episode = None;
                self.state = SleepState::Asleep;
            }
            (false, false) => self.handle_disturbance(now),
            // Partial loss while already asleep: hold the current state
            _ => {}
        }
        self.state
    }

    fn handle_disturbance(&mut self, now: DateTime<Utc>) {
        let episode = match self.episode {
            Some(episode) => episode,
            None => {
                self.disturbance_count += 1;
                self.episode = Some(DisturbanceEpisode { started_at: now });
                self.state = SleepState::Disturbed;
                return;
            }
        };

        if (now - episode.started_at).num_seconds() > self.max_disturbance_secs {
            self.episode = None;
            self.state = SleepState::Awake;
            if !self.countdown_active {
                // No countdown running: the wearer woke up for real
                self.sleep_detected = false;
                self.sleep_start = None;
            }
        } else {
            self.state = SleepState::Disturbed;
        }
    }

    /// Reset all transient detection state back to Awake
    pub fn reset(&mut self) {
        self.state = SleepState::Awake;
        self.sleep_detected = false;
        self.sleep_start = None;
        self.episode = None;
        self.disturbance_count = 0;
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    pub fn sleep_detected(&self) -> bool {
        self.sleep_detected
    }

    pub fn sleep_start(&self) -> Option<DateTime<Utc>> {
        self.sleep_start
    }

    pub fn disturbance_count(&self) -> u32 {
        self.disturbance_count
    }

    pub fn set_countdown_active(&mut self, active: bool) {
        self.countdown_active = active;
    }

    pub fn countdown_active(&self) -> bool {
        self.countdown_active
    }
}
