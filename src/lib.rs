//! Somnus Engine - On-device personalized sleep-detection engine for wearables
//!
//! Somnus decides, from a live stream of heart-rate samples and a fused
//! motion-magnitude signal, whether the wearer has fallen asleep, remains
//! asleep through transient disturbance, or has woken, and adapts its
//! heart-rate threshold to the individual over time.
//!
//! ## Modules
//!
//! - **age**: per-age-bracket defaults seeding the threshold model
//! - **filter**: outlier filtering of heart-rate batches
//! - **model**: the adaptive threshold model with safety bounds
//! - **motion**: stillness gating over the motion-magnitude stream
//! - **state**: the four-state detection machine with disturbance tolerance
//! - **store**: versioned persistence with backup-based corruption recovery
//! - **engine**: the orchestrator the host application drives

pub mod age;
pub mod engine;
pub mod error;
pub mod filter;
pub mod model;
pub mod motion;
pub mod state;
pub mod store;
pub mod types;

pub use age::AgeBracket;
pub use engine::{EngineConfig, SharedSleepEngine, SleepEngine};
pub use error::EngineError;
pub use filter::{FilterConfig, OutlierFilter};
pub use model::ThresholdModel;
pub use motion::MotionGate;
pub use state::SleepStateMachine;
pub use store::{MemoryStore, ModelStore, SettingsStore, SCHEMA_VERSION};
pub use types::{
    EngineEvent, EngineSnapshot, HeartRateSample, SleepSession, SleepState,
    StatusClassification, ThresholdState,
};

/// Engine version embedded in diagnostic output
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostic output
pub const PRODUCER_NAME: &str = "somnus-engine";
