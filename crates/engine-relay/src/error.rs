//! Error types for the engine supervisor and request routing.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the engine layer.
///
/// Process-level variants (`MissingFile`, `SpawnFailed`) disable an engine for good.
/// Request-level variants only fail the request that produced them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine \"{0}\" is not configured")]
    UnknownEngine(String),

    #[error("engine \"{name}\" is missing its {kind}: {}", .path.display())]
    MissingFile {
        name: String,
        kind: &'static str,
        path: PathBuf,
    },

    #[error("engine \"{name}\" failed to spawn: {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("engine \"{0}\" is not running")]
    NotRunning(String),

    /// Requests must be JSON objects so the correlation id can be merged in.
    #[error("request payload must be a JSON object")]
    InvalidPayload,

    #[error("engine \"{0}\" rejected the request write")]
    WriteFailed(String),

    #[error("engine \"{name}\" timeout after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("engine \"{0}\" went away before replying")]
    ProcessExited(String),

    /// The preferred engine has not passed its warmup yet.
    #[error("engine {0} warming")]
    Warming(String),

    #[error("no engine available")]
    NoEngineAvailable,

    #[error("all engines failed")]
    AllEnginesFailed,
}

impl EngineError {
    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownEngine(_) => "unknown_engine",
            EngineError::MissingFile { .. } => "missing_file",
            EngineError::SpawnFailed { .. } => "spawn_failed",
            EngineError::NotRunning(_) => "engine_not_running",
            EngineError::InvalidPayload => "invalid_payload",
            EngineError::WriteFailed(_) => "write_failed",
            EngineError::Timeout { .. } => "engine_timeout",
            EngineError::ProcessExited(_) => "engine_exited",
            EngineError::Warming(_) => "engine_warming",
            EngineError::NoEngineAvailable => "no_engine_available",
            EngineError::AllEnginesFailed => "all_engines_failed",
        }
    }

    /// Whether the failure means no engine could serve the request at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::Warming(_)
                | EngineError::NoEngineAvailable
                | EngineError::AllEnginesFailed
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_engine() {
        let err = EngineError::Timeout {
            name: "hard".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "engine \"hard\" timeout after 250ms");
        assert_eq!(err.code(), "engine_timeout");
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_missing_file_message() {
        let err = EngineError::MissingFile {
            name: "easy".to_string(),
            kind: "model",
            path: PathBuf::from("/nope/model.bin.gz"),
        };
        assert_eq!(
            err.to_string(),
            "engine \"easy\" is missing its model: /nope/model.bin.gz"
        );
    }

    #[test]
    fn test_unavailable_variants() {
        assert!(EngineError::NoEngineAvailable.is_unavailable());
        assert!(EngineError::AllEnginesFailed.is_unavailable());
        assert!(EngineError::Warming("hard".into()).is_unavailable());
        assert!(!EngineError::NotRunning("easy".into()).is_unavailable());
    }
}
