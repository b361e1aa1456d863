//! TeleClaw error types.

use std::collections::BTreeMap;

use thiserror::Error;

/// Why a precheck pass refused to let a task start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecheckFailure {
    /// Every account/target combination was blocked.
    NoReadyPairs,
    /// The task uses the strict policy and at least one combination was blocked.
    StrictPolicyViolated,
}

impl std::fmt::Display for PrecheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrecheckFailure::NoReadyPairs => write!(f, "no ready account/target pairs"),
            PrecheckFailure::StrictPolicyViolated => {
                write!(f, "strict precheck policy violated by blocked pairs")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TeleclawError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task is running, stop it first: {0}")]
    TaskRunning(String),

    #[error("Precheck failed for task {task_id}: {reason} (blocked: {blocked_reasons:?})")]
    Precheck {
        task_id: String,
        reason: PrecheckFailure,
        blocked_reasons: BTreeMap<String, usize>,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Access error: {0}")]
    Access(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TeleclawError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precheck_error_mentions_reason_and_counts() {
        let mut counts = BTreeMap::new();
        counts.insert("write_forbidden".to_string(), 2);
        let err = TeleclawError::Precheck {
            task_id: "t1".into(),
            reason: PrecheckFailure::NoReadyPairs,
            blocked_reasons: counts,
        };
        let msg = err.to_string();
        assert!(msg.contains("no ready"));
        assert!(msg.contains("write_forbidden"));
    }
}
