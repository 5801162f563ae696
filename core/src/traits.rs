//! Core traits defining RAS interfaces
//!
//! The coordinator talks to its collaborators only through these traits, so
//! the ephemeral store, the durable repository, identity and the outcome
//! callback can each be swapped without touching the voting engine.

use crate::types::*;
use async_trait::async_trait;
use std::time::Duration;

/// Result type for RAS operations
pub type RasResult<T> = Result<T, crate::error::RasError>;

/// TTL-bounded, non-durable key-value container.
///
/// Each call is atomic for its key. A missing or expired key is
/// `RasError::KeyNotFound`, never an empty value.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store `value` under `key`; `None` uses the store-wide default TTL
    async fn put(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> RasResult<()>;

    /// Fetch the value under `key`
    async fn get(&self, key: &[u8]) -> RasResult<Vec<u8>>;

    /// Remove `key`, returning whether it was present
    async fn delete(&self, key: &[u8]) -> RasResult<bool>;
}

/// Result of a conditional durable finalize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// State and votes were written by this call
    Committed,
    /// The session had already left `New`; nothing was written
    AlreadyFinal(SessionState),
}

/// Durable storage for sessions, final votes and topic groups
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session record
    async fn create_session(&self, session: &VotingSession) -> RasResult<()>;

    /// Look up a session
    async fn get_session(&self, id: &SessionId) -> RasResult<Option<VotingSession>>;

    /// Look up a topic group
    async fn get_accord(&self, id: AccordId) -> RasResult<Option<Accord>>;

    /// Atomically set the terminal state and subject and insert `votes`,
    /// but only while the session is still `New`
    async fn finalize_session(
        &self,
        id: &SessionId,
        state: SessionState,
        subject: &str,
        votes: Vec<FinalVoteRecord>,
    ) -> RasResult<CommitOutcome>;

    /// Move a `New` session to `Voided`
    async fn void_session(&self, id: &SessionId) -> RasResult<VotingSession>;

    /// Final votes recorded for a session
    async fn votes_for_session(&self, id: &SessionId) -> RasResult<Vec<FinalVoteRecord>>;

    /// Final votes for every session opened on a post
    async fn votes_for_post(&self, post_uri: &str) -> RasResult<Vec<FinalVoteRecord>>;
}

/// Source of reviewers eligible for panel selection
#[async_trait]
pub trait ReviewerPool: Send + Sync {
    async fn eligible_reviewers(&self) -> RasResult<Vec<ReviewerId>>;
}

/// Resolves a bearer credential to a reviewer
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> RasResult<ReviewerId>;
}

/// Delivers a final decision to the session's origin
#[async_trait]
pub trait OutcomeNotifier: Send + Sync {
    async fn notify(&self, outcome: &SessionOutcome) -> RasResult<()>;
}
