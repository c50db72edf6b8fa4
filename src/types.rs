//! Core types for the Somnus sleep-detection engine
//!
//! This module defines the data structures shared across the engine: sensor
//! samples, recorded sleep sessions, the persisted threshold state, and the
//! observable detection state exposed to host applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observable detection state for an active monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepState {
    /// No sleep evidence; initial state
    Awake,
    /// Exactly one of the two sleep conditions is met
    PotentialSleep,
    /// Both conditions met; sleep onset recorded
    Asleep,
    /// Sleep was detected but conditions are transiently failing
    Disturbed,
}

impl SleepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepState::Awake => "awake",
            SleepState::PotentialSleep => "potential_sleep",
            SleepState::Asleep => "asleep",
            SleepState::Disturbed => "disturbed",
        }
    }
}

/// A single heart-rate reading pushed by the heart-rate source
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Heart rate in beats per minute (> 0)
    pub bpm: f64,
}

/// A completed monitoring period with its collected heart-rate batch.
///
/// Sessions feed the personalization update: each one contributes its mean,
/// minimum, and spread of heart rates relative to the resting rate recorded
/// at the time.
///
/// `id` and `is_night_sleep` default on decode so that schema-v1 records,
/// which predate both fields, still load during migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepSession {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// When the session ended (used for history ordering and eviction)
    pub date: DateTime<Utc>,
    /// Outlier-filtered heart rates collected while asleep
    pub heart_rates: Vec<f64>,
    /// Resting heart rate at session end (bpm, > 0)
    pub resting_heart_rate: f64,
    /// Whether the session was recorded during night hours
    #[serde(default)]
    pub is_night_sleep: bool,
}

impl SleepSession {
    pub fn new(
        date: DateTime<Utc>,
        heart_rates: Vec<f64>,
        resting_heart_rate: f64,
        is_night_sleep: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            heart_rates,
            resting_heart_rate,
            is_night_sleep,
        }
    }

    /// Mean of the collected heart rates
    pub fn mean_hr(&self) -> f64 {
        if self.heart_rates.is_empty() {
            return 0.0;
        }
        self.heart_rates.iter().sum::<f64>() / self.heart_rates.len() as f64
    }

    /// Minimum collected heart rate
    pub fn min_hr(&self) -> f64 {
        self.heart_rates
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Population standard deviation of the collected heart rates
    pub fn std_dev_hr(&self) -> f64 {
        if self.heart_rates.is_empty() {
            return 0.0;
        }
        let mean = self.mean_hr();
        let variance = self
            .heart_rates
            .iter()
            .map(|hr| (hr - mean).powi(2))
            .sum::<f64>()
            / self.heart_rates.len() as f64;
        variance.sqrt()
    }
}

/// Persisted per-wearer threshold model state.
///
/// Mutated only by the threshold model's update algorithm and persisted after
/// every mutation. Both ratios stay within [0.75, 0.95] at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdState {
    /// Threshold ratio applied during day hours
    pub day_ratio: f64,
    /// Threshold ratio applied during night hours
    pub night_ratio: f64,
    /// When the model last completed a personalization update
    pub last_update: Option<DateTime<Utc>>,
    /// First time the model was initialized; never overwritten
    pub first_use: DateTime<Utc>,
    /// Persistence schema version, gates one-time migrations on load
    pub schema_version: u32,
}

/// Transient record of an in-progress disturbance while asleep.
///
/// Exists only while the state machine is in [`SleepState::Disturbed`];
/// destroyed on return to Asleep or promotion to Awake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisturbanceEpisode {
    pub started_at: DateTime<Utc>,
}

/// Textual classification of the engine's current condition, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClassification {
    /// Detection inactive or heart-rate data unavailable
    Waiting,
    /// Detection active, wearer awake
    Monitoring,
    /// One sleep condition met
    NearSleep,
    /// Both conditions met, sleep confirmed
    Sleeping,
    /// Sleep detected but currently disturbed
    Disturbed,
    /// Wearer woke during a countdown; the timer keeps running
    TimerContinuing,
}

impl StatusClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClassification::Waiting => "waiting for data",
            StatusClassification::Monitoring => "monitoring",
            StatusClassification::NearSleep => "settling",
            StatusClassification::Sleeping => "sleeping",
            StatusClassification::Disturbed => "disturbed",
            StatusClassification::TimerContinuing => "awake, timer continuing",
        }
    }
}

/// Pollable snapshot of the engine's observable fields
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: SleepState,
    pub sleep_detected: bool,
    pub sleep_start: Option<DateTime<Utc>>,
    pub disturbance_count: u32,
    /// Threshold ratio active for the current day/night mode
    pub threshold_ratio: f64,
    /// Absolute threshold in bpm (0.0 when resting HR is unavailable)
    pub threshold_bpm: f64,
    pub status: StatusClassification,
}

/// Event emitted when observable engine state changes.
///
/// Events accumulate in an internal queue and are drained by the host via
/// `SleepEngine::take_events`; no reactive framework is assumed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        from: SleepState,
        to: SleepState,
        at: DateTime<Utc>,
    },
    SleepDetected {
        at: DateTime<Utc>,
    },
    DisturbanceStarted {
        at: DateTime<Utc>,
        count: u32,
    },
    /// Sleep tracking fully reset after an over-long disturbance
    SleepEnded {
        at: DateTime<Utc>,
    },
    ThresholdsUpdated {
        day_ratio: f64,
        night_ratio: f64,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_session_metrics() {
        let session = SleepSession::new(Utc::now(), vec![50.0, 52.0, 54.0], 60.0, false);
        assert!((session.mean_hr() - 52.0).abs() < 1e-9);
        assert!((session.min_hr() - 50.0).abs() < 1e-9);
        // Population std dev of {50, 52, 54} = sqrt(8/3)
        assert!((session.std_dev_hr() - (8.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_session_metrics_empty() {
        let session = SleepSession::new(Utc::now(), vec![], 60.0, false);
        assert_eq!(session.mean_hr(), 0.0);
        assert_eq!(session.std_dev_hr(), 0.0);
    }

    #[test]
    fn test_schema_v1_session_decodes_with_defaults() {
        // A v1 record has no id and no night flag
        let json = r#"{
            "date": "2024-01-15T06:30:00Z",
            "heart_rates": [52.0, 51.0],
            "resting_heart_rate": 60.0
        }"#;
        let session: SleepSession = serde_json::from_str(json).unwrap();
        assert!(!session.is_night_sleep);
        assert_eq!(session.heart_rates.len(), 2);
    }

    #[test]
    fn test_sleep_state_labels() {
        assert_eq!(SleepState::PotentialSleep.as_str(), "potential_sleep");
        assert_eq!(SleepState::Disturbed.as_str(), "disturbed");
    }
}
