//! Error types for the Somnus engine

use thiserror::Error;

/// Errors surfaced to engine callers.
///
/// The engine favors availability over strictness: malformed sensor bursts
/// and persistence corruption are absorbed internally (no-op or recovery),
/// never propagated. Only failures the caller can act on appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
