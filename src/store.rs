//! Versioned model persistence
//!
//! The engine does not talk to storage directly: the host injects a
//! [`SettingsStore`] port (a string key-value store with get/set/remove) and
//! [`ModelStore`] layers the engine's conventions on top of it: JSON-encoded
//! records, a backup copy of the session history under a sibling key, a
//! schema-version gate with one-time migration, and corruption recovery that
//! never surfaces as a fatal error.
//!
//! Writes are fire-and-forget from the engine's perspective; an
//! implementation that persists asynchronously or drops writes on I/O error
//! satisfies the port.

use crate::types::{SleepSession, ThresholdState};
use std::collections::HashMap;

/// Current persistence schema version.
///
/// v1 stored session records without `id` and `is_night_sleep`; v2 carries
/// both. Loading a v1 store re-encodes every session once and bumps the
/// stored version.
pub const SCHEMA_VERSION: u32 = 2;

/// Primary key for the persisted threshold state record
pub const THRESHOLD_STATE_KEY: &str = "somnus.threshold_state";

/// Primary key for the persisted session history
pub const SESSIONS_KEY: &str = "somnus.sessions";

/// Backup key convention: `<key>.backup`
pub fn backup_key(key: &str) -> String {
    format!("{key}.backup")
}

/// Injected persistence port.
///
/// Values are opaque strings (the engine stores JSON). Implementations must
/// support an independent backup key per primary key; `ModelStore` maintains
/// the backup copies itself.
pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// In-memory `SettingsStore` for tests and hosts without durable storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Engine-side wrapper over the injected store
pub struct ModelStore {
    store: Box<dyn SettingsStore>,
}

impl ModelStore {
    pub fn new(store: Box<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Load the persisted threshold state, if any.
    ///
    /// A record that fails to decode is treated as absent; the caller
    /// re-seeds from bracket defaults.
    pub fn load_state(&self) -> Option<ThresholdState> {
        let raw = self.store.get(THRESHOLD_STATE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("threshold state failed to decode, reseeding: {err}");
                None
            }
        }
    }

    pub fn save_state(&mut self, state: &ThresholdState) {
        if let Ok(json) = serde_json::to_string(state) {
            self.store.set(THRESHOLD_STATE_KEY, &json);
        }
    }

    /// Load the session history with corruption recovery.
    ///
    /// Primary copy first; on decode failure the backup copy; if both fail,
    /// an empty history. Learned threshold ratios live under a separate key
    /// and are unaffected.
    pub fn load_sessions(&self) -> Vec<SleepSession> {
        match self.decode_sessions(SESSIONS_KEY) {
            Some(sessions) => sessions,
            None => {
                let backup = backup_key(SESSIONS_KEY);
                match self.decode_sessions(&backup) {
                    Some(sessions) => {
                        log::warn!(
                            "primary session history unreadable, restored {} sessions from backup",
                            sessions.len()
                        );
                        sessions
                    }
                    None => {
                        if self.store.get(SESSIONS_KEY).is_some() {
                            log::warn!("session history and backup both unreadable, starting empty");
                        }
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Persist the session history to the primary and backup keys
    pub fn save_sessions(&mut self, sessions: &[SleepSession]) {
        if let Ok(json) = serde_json::to_string(sessions) {
            self.store.set(SESSIONS_KEY, &json);
            self.store.set(&backup_key(SESSIONS_KEY), &json);
        }
    }

    /// Run the one-time schema migration if the stored version is behind.
    ///
    /// Re-encodes the session history (v1 records decode leniently through
    /// serde defaults) and bumps `schema_version`. Unreadable histories fall
    /// through to the corruption-recovery path inside `load_sessions`, so a
    /// failed migration degrades to best-effort defaults instead of
    /// blocking startup.
    pub fn migrate_if_needed(&mut self, state: &mut ThresholdState) {
        if state.schema_version >= SCHEMA_VERSION {
            return;
        }
        log::info!(
            "migrating persisted model from schema v{} to v{}",
            state.schema_version,
            SCHEMA_VERSION
        );

        let sessions = self.load_sessions();
        self.save_sessions(&sessions);

        state.schema_version = SCHEMA_VERSION;
        self.save_state(state);
    }

    fn decode_sessions(&self, key: &str) -> Option<Vec<SleepSession>> {
        let raw = self.store.get(key)?;
        serde_json::from_str(&raw).ok()
    }

    #[cfg(test)]
    pub(crate) fn raw_store(&mut self) -> &mut dyn SettingsStore {
        self.store.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_sessions(count: usize) -> Vec<SleepSession> {
        (0..count)
            .map(|i| {
                SleepSession::new(
                    Utc::now(),
                    vec![50.0 + i as f64, 52.0, 51.0],
                    60.0,
                    i % 2 == 0,
                )
            })
            .collect()
    }

    #[test]
    fn test_state_round_trip() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));
        let state = ThresholdState {
            day_ratio: 0.85,
            night_ratio: 0.83,
            last_update: None,
            first_use: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        store.save_state(&state);

        let loaded = store.load_state().unwrap();
        assert_eq!(loaded.day_ratio, 0.85);
        assert_eq!(loaded.night_ratio, 0.83);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_corrupt_state_treated_as_absent() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));
        store.raw_store().set(THRESHOLD_STATE_KEY, "{not json");
        assert!(store.load_state().is_none());
    }

    #[test]
    fn test_corrupt_primary_recovers_from_backup() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));
        let sessions = sample_sessions(4);
        store.save_sessions(&sessions);

        // Corrupt only the primary copy
        store.raw_store().set(SESSIONS_KEY, "corrupted!!");

        let restored = store.load_sessions();
        assert_eq!(restored.len(), 4);
    }

    #[test]
    fn test_both_copies_corrupt_resets_to_empty() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));
        store.save_sessions(&sample_sessions(3));
        store.raw_store().set(SESSIONS_KEY, "corrupted!!");
        let backup = backup_key(SESSIONS_KEY);
        store.raw_store().set(&backup, "also corrupted");

        assert!(store.load_sessions().is_empty());
    }

    #[test]
    fn test_missing_history_loads_empty() {
        let store = ModelStore::new(Box::new(MemoryStore::new()));
        assert!(store.load_sessions().is_empty());
    }

    #[test]
    fn test_migration_re_encodes_v1_sessions() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));

        // Seed a v1-era history: no ids, no night flags, no backup copy
        let v1 = r#"[
            {"date": "2024-01-15T06:30:00Z", "heart_rates": [52.0, 51.0], "resting_heart_rate": 60.0},
            {"date": "2024-01-16T06:30:00Z", "heart_rates": [54.0, 53.0], "resting_heart_rate": 60.0}
        ]"#;
        store.raw_store().set(SESSIONS_KEY, v1);

        let mut state = ThresholdState {
            day_ratio: 0.85,
            night_ratio: 0.83,
            last_update: None,
            first_use: Utc::now(),
            schema_version: 1,
        };
        store.migrate_if_needed(&mut state);

        assert_eq!(state.schema_version, SCHEMA_VERSION);
        // Both copies now exist and carry the defaulted fields
        let sessions = store.load_sessions();
        assert_eq!(sessions.len(), 2);
        let backup_raw = store.raw_store().get(&backup_key(SESSIONS_KEY)).unwrap();
        assert!(backup_raw.contains("is_night_sleep"));
    }

    #[test]
    fn test_migration_noop_at_current_version() {
        let mut store = ModelStore::new(Box::new(MemoryStore::new()));
        let mut state = ThresholdState {
            day_ratio: 0.80,
            night_ratio: 0.80,
            last_update: None,
            first_use: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        store.migrate_if_needed(&mut state);
        // Nothing written: no session keys appear
        assert!(store.raw_store().get(SESSIONS_KEY).is_none());
    }
}
