//! Motion stillness gating
//!
//! Reduces the continuous motion-magnitude stream (already fused from the
//! device's motion axes by the sampling collaborator, ~2 Hz) to a boolean
//! "is-still" condition with a minimum-duration requirement, plus an
//! accumulated still-duration counter the state machine queries.
//!
//! Also tracks a rolling intense-activity flag used to bias the day
//! threshold after workouts; it clears itself four hours after the last
//! intense reading.

use chrono::{DateTime, Duration, Utc};

/// Seconds of quiet required before "is-still" latches on
pub const STILL_DURATION_THRESHOLD_SECS: i64 = 60;
/// Motion magnitude at or above which a sample counts as intense activity
pub const INTENSE_ACTIVITY_THRESHOLD: f64 = 2.0;
/// Hours after which the intense-activity flag expires
pub const INTENSE_ACTIVITY_WINDOW_HOURS: i64 = 4;
/// Default motion magnitude at or above which a sample counts as motion
pub const DEFAULT_MOTION_THRESHOLD: f64 = 0.1;

/// Stillness detector over the fused motion-magnitude stream
#[derive(Debug, Clone)]
pub struct MotionGate {
    motion_threshold: f64,
    /// Instant of the last motion sample, or the first sample seen
    last_motion_at: Option<DateTime<Utc>>,
    is_still: bool,
    still_seconds: u32,
    last_intense_at: Option<DateTime<Utc>>,
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD)
    }
}

impl MotionGate {
    pub fn new(motion_threshold: f64) -> Self {
        Self {
            motion_threshold,
            last_motion_at: None,
            is_still: false,
            still_seconds: 0,
            last_intense_at: None,
        }
    }

    /// Feed one fused motion-magnitude sample.
    ///
    /// Motion resets the stillness tracking immediately; quiet samples latch
    /// "is-still" once [`STILL_DURATION_THRESHOLD_SECS`] have elapsed since
    /// the last motion.
    pub fn observe(&mut self, magnitude: f64, now: DateTime<Utc>) {
        if magnitude >= self.motion_threshold {
            self.last_motion_at = Some(now);
            self.is_still = false;
            self.still_seconds = 0;
            if magnitude >= INTENSE_ACTIVITY_THRESHOLD {
                self.last_intense_at = Some(now);
            }
        } else {
            let anchor = *self.last_motion_at.get_or_insert(now);
            if (now - anchor).num_seconds() >= STILL_DURATION_THRESHOLD_SECS {
                self.is_still = true;
            }
        }
        self.expire_intense_flag(now);
    }

    /// Advance the still-duration counter; the host calls this once per
    /// second. Counts only while "is-still" is latched.
    pub fn tick_second(&mut self) {
        if self.is_still {
            self.still_seconds += 1;
        }
    }

    /// True once stillness has been latched for at least `seconds`
    pub fn has_been_still_for(&self, seconds: u32) -> bool {
        self.is_still && self.still_seconds >= seconds
    }

    pub fn is_still(&self) -> bool {
        self.is_still
    }

    pub fn still_seconds(&self) -> u32 {
        self.still_seconds
    }

    /// Whether an intense-activity reading occurred within the rolling window
    pub fn had_intense_activity(&self, now: DateTime<Utc>) -> bool {
        self.last_intense_at
            .is_some_and(|at| now - at <= Duration::hours(INTENSE_ACTIVITY_WINDOW_HOURS))
    }

    /// Reset all stillness tracking; keeps the intense-activity flag
    pub fn reset(&mut self) {
        self.last_motion_at = None;
        self.is_still = false;
        self.still_seconds = 0;
    }

    fn expire_intense_flag(&mut self, now: DateTime<Utc>) {
        if let Some(at) = self.last_intense_at {
            if now - at > Duration::hours(INTENSE_ACTIVITY_WINDOW_HOURS) {
                self.last_intense_at = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_stillness_requires_quiet_duration() {
        let mut gate = MotionGate::default();
        gate.observe(0.5, t(0)); // motion
        gate.observe(0.01, t(30));
        assert!(!gate.is_still());
        gate.observe(0.01, t(59));
        assert!(!gate.is_still());
        gate.observe(0.01, t(60));
        assert!(gate.is_still());
    }

    #[test]
    fn test_motion_resets_stillness_and_counter() {
        let mut gate = MotionGate::default();
        gate.observe(0.5, t(0));
        gate.observe(0.01, t(120));
        assert!(gate.is_still());
        for _ in 0..30 {
            gate.tick_second();
        }
        assert_eq!(gate.still_seconds(), 30);

        gate.observe(0.8, t(150));
        assert!(!gate.is_still());
        assert_eq!(gate.still_seconds(), 0);
    }

    #[test]
    fn test_still_counter_only_advances_while_still() {
        let mut gate = MotionGate::default();
        gate.observe(0.5, t(0));
        gate.tick_second();
        gate.tick_second();
        assert_eq!(gate.still_seconds(), 0);

        gate.observe(0.01, t(90));
        assert!(gate.is_still());
        for _ in 0..120 {
            gate.tick_second();
        }
        assert!(gate.has_been_still_for(120));
        assert!(!gate.has_been_still_for(121));
    }

    #[test]
    fn test_first_quiet_sample_anchors_stillness() {
        let mut gate = MotionGate::default();
        // No motion ever seen: quiet period measured from the first sample
        gate.observe(0.01, t(0));
        assert!(!gate.is_still());
        gate.observe(0.01, t(61));
        assert!(gate.is_still());
    }

    #[test]
    fn test_intense_activity_flag_expires_after_window() {
        let mut gate = MotionGate::default();
        gate.observe(2.5, t(0));
        assert!(gate.had_intense_activity(t(60)));
        assert!(gate.had_intense_activity(t(4 * 3600)));
        assert!(!gate.had_intense_activity(t(4 * 3600 + 1)));

        // The flag also self-clears on the next observation past the window
        gate.observe(0.01, t(5 * 3600));
        assert!(!gate.had_intense_activity(t(5 * 3600)));
    }

    #[test]
    fn test_moderate_motion_does_not_set_intense_flag() {
        let mut gate = MotionGate::default();
        gate.observe(1.0, t(0));
        assert!(!gate.had_intense_activity(t(1)));
    }
}
