//! Error types for RAS

use crate::types::SessionState;
use thiserror::Error;

/// Main error type for RAS
#[derive(Error, Debug)]
pub enum RasError {
    // ============ Request Errors ============
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Reviewer is not on the panel for this session")]
    NotAPanelist,

    #[error("Reviewer has already voted on this session")]
    AlreadyVoted,

    #[error("Not found: {0}")]
    NotFound(String),

    // ============ Session Errors ============
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Session is not pending (finalized, expired or evicted)")]
    SessionUnavailable,

    #[error("Insufficient reviewers: required {required}, available {available}")]
    InsufficientReviewers { required: usize, available: usize },

    // ============ Ephemeral Store Errors ============
    #[error("Key not found in ephemeral store")]
    KeyNotFound,

    #[error("Entry too large: {size} bytes exceeds segment limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("Value decode failed: {0}")]
    Decode(String),

    // ============ Durable Store Errors ============
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for RasError {
    fn from(err: std::io::Error) -> Self {
        RasError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RasError {
    fn from(err: serde_json::Error) -> Self {
        RasError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = RasError::InvalidTransition {
            from: SessionState::Allowed,
            to: SessionState::Voided,
        };
        assert_eq!(err.to_string(), "Invalid state transition: allowed -> voided");
    }
}
