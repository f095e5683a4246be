//! Error types for the escalation engine.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Comprehensive error type for the escalation engine.
///
/// "No applicable rule" and the duplicate-escalation race are deliberately
/// absent: the first is an ordinary skip, the second an ordinary outcome
/// (`RaiseOutcome::Duplicate`), neither is an error.
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors - rejected at rule-save time
    #[error("invalid escalation rule: {reason}")]
    InvalidRule { reason: String },

    // Storage/persistence errors
    #[error("database error")]
    Database {
        #[from]
        source: sqlx::Error,
    },
    #[error("serialization error")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid stored value in column {column}: {value}")]
    Decode { column: String, value: String },

    // Lookup errors
    #[error("case not found: {case_id}")]
    CaseNotFound { case_id: Uuid },
    #[error("escalation not found: {escalation_id}")]
    EscalationNotFound { escalation_id: Uuid },
    #[error("escalation {escalation_id} is already resolved")]
    AlreadyResolved { escalation_id: Uuid },

    // Best-effort side effects - logged, never roll back an escalation
    #[error("auto action {action} failed: {reason}")]
    AutoActionFailed { action: String, reason: String },
    #[error("notification enqueue failed: {reason}")]
    NotificationEnqueueFailed { reason: String },
}

impl EngineError {
    pub(crate) fn decode(column: &str, value: impl Into<String>) -> Self {
        EngineError::Decode {
            column: column.to_string(),
            value: value.into(),
        }
    }
}
