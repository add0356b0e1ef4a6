//! Error types for the governance-session engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[derive(Error, Debug)]
pub enum GovernanceError {

    // =============================
    // Collaborator Errors
    // =============================

    /// Text-generation failure. `retryable` marks rate-limit and
    /// server-error classes.
    #[error("Generation error: {message}")]
    Generation { message: String, retryable: bool },

    #[error("Generation retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // Validation Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Skip budget exhausted: {used} of {budget} skips already used")]
    SkipBudgetExhausted { used: u8, budget: u8 },

    #[error("Time allocation totals {total}%, outside the accepted 90-110% band")]
    AllocationOutOfBand { total: u32 },

    #[error("Invalid transition: {action} is not allowed in state {state}")]
    InvalidTransition { action: String, state: String },

    // =============================
    // Session Lifecycle Errors
    // =============================

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session is closed: {0}")]
    SessionClosed(Uuid),

    #[error("Session {0} was modified by another writer")]
    ConcurrentModification(Uuid),

    #[error("Record not found: {0}")]
    NotFound(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GovernanceError {
    pub fn generation(message: impl Into<String>, retryable: bool) -> Self {
        GovernanceError::Generation {
            message: message.into(),
            retryable,
        }
    }

    pub fn invalid_transition(action: &str, state: impl std::fmt::Debug) -> Self {
        GovernanceError::InvalidTransition {
            action: action.to_string(),
            state: format!("{:?}", state),
        }
    }

    /// Only collaborator failures in the rate-limit / server-error class
    /// are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GovernanceError::Generation { retryable: true, .. })
    }

    /// Local, synchronous failures that never mutate a session.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GovernanceError::Validation(_)
                | GovernanceError::SkipBudgetExhausted { .. }
                | GovernanceError::AllocationOutOfBand { .. }
                | GovernanceError::InvalidTransition { .. }
        )
    }
}

impl From<sqlx::Error> for GovernanceError {
    fn from(e: sqlx::Error) -> Self {
        GovernanceError::Database(e.to_string())
    }
}
