//! In-memory durable repository for tests and single-process deployments
//!
//! All tables sit behind one lock, so a finalize that updates the session
//! and inserts its votes is observed all-or-nothing.

use async_trait::async_trait;
use parking_lot::RwLock;
use ras_core::{
    Accord, AccordId, CommitOutcome, FinalVoteRecord, RasError, RasResult, Reviewer, ReviewerId,
    ReviewerPool, SessionId, SessionRepository, SessionState, VotingSession,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, VotingSession>,
    votes: Vec<FinalVoteRecord>,
    accords: HashMap<AccordId, Accord>,
    reviewers: BTreeMap<ReviewerId, Reviewer>,
}

/// Durable tables kept in memory
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a topic group
    pub fn add_accord(&self, accord: Accord) {
        self.tables.write().accords.insert(accord.id, accord);
    }

    /// Register or replace a reviewer
    pub fn add_reviewer(&self, reviewer: Reviewer) {
        self.tables.write().reviewers.insert(reviewer.id, reviewer);
    }

    pub fn session_count(&self) -> usize {
        self.tables.read().sessions.len()
    }

    pub fn vote_count(&self) -> usize {
        self.tables.read().votes.len()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn create_session(&self, session: &VotingSession) -> RasResult<()> {
        let mut tables = self.tables.write();
        if tables.sessions.contains_key(&session.id) {
            return Err(RasError::Persistence(format!("session {} already exists", session.id)));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> RasResult<Option<VotingSession>> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }

    async fn get_accord(&self, id: AccordId) -> RasResult<Option<Accord>> {
        Ok(self.tables.read().accords.get(&id).cloned())
    }

    async fn finalize_session(
        &self,
        id: &SessionId,
        state: SessionState,
        subject: &str,
        votes: Vec<FinalVoteRecord>,
    ) -> RasResult<CommitOutcome> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let session = tables
            .sessions
            .get_mut(id)
            .ok_or_else(|| RasError::NotFound(format!("session {id}")))?;

        if session.state.is_terminal() {
            return Ok(CommitOutcome::AlreadyFinal(session.state));
        }
        if !session.state.can_transition_to(state) {
            return Err(RasError::InvalidTransition {
                from: session.state,
                to: state,
            });
        }

        session.state = state;
        session.subject = subject.to_string();
        let count = votes.len();
        tables.votes.extend(votes);

        debug!("Committed session {} as {} with {} votes", id, state, count);
        Ok(CommitOutcome::Committed)
    }

    async fn void_session(&self, id: &SessionId) -> RasResult<VotingSession> {
        let mut tables = self.tables.write();
        let session = tables
            .sessions
            .get_mut(id)
            .ok_or_else(|| RasError::NotFound(format!("session {id}")))?;

        if !session.state.can_transition_to(SessionState::Voided) {
            return Err(RasError::InvalidTransition {
                from: session.state,
                to: SessionState::Voided,
            });
        }
        session.state = SessionState::Voided;
        Ok(session.clone())
    }

    async fn votes_for_session(&self, id: &SessionId) -> RasResult<Vec<FinalVoteRecord>> {
        Ok(self
            .tables
            .read()
            .votes
            .iter()
            .filter(|v| v.ras_id == *id)
            .cloned()
            .collect())
    }

    async fn votes_for_post(&self, post_uri: &str) -> RasResult<Vec<FinalVoteRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .votes
            .iter()
            .filter(|v| {
                tables
                    .sessions
                    .get(&v.ras_id)
                    .map_or(false, |s| s.post_uri == post_uri)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReviewerPool for MemoryRepository {
    async fn eligible_reviewers(&self) -> RasResult<Vec<ReviewerId>> {
        Ok(self.tables.read().reviewers.keys().copied().collect())
    }
}

/// Thread-safe repository handle
pub type SharedMemoryRepository = Arc<MemoryRepository>;

/// Create a shared in-memory repository
pub fn create_memory_repository() -> SharedMemoryRepository {
    Arc::new(MemoryRepository::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_core::{Decision, NewSession, Timestamp};

    fn session(post: &str) -> VotingSession {
        VotingSession::new(&NewSession {
            subject: "is this spam".into(),
            post_uri: post.into(),
            redirect_uri: "https://mod.example/hook".into(),
            accord: AccordId(1),
        })
    }

    fn votes(id: SessionId, n: i64) -> Vec<FinalVoteRecord> {
        (0..n)
            .map(|i| FinalVoteRecord {
                ras_id: id,
                voter: ReviewerId(i),
                state: Decision::Rejected,
                note: String::new(),
                created_at: Timestamp::now(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = MemoryRepository::new();
        let s = session("https://forum.example/p/1");
        repo.create_session(&s).await.unwrap();

        assert_eq!(repo.get_session(&s.id).await.unwrap(), Some(s.clone()));
        assert!(repo.create_session(&s).await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_only_once() {
        let repo = MemoryRepository::new();
        let s = session("https://forum.example/p/1");
        repo.create_session(&s).await.unwrap();

        let first = repo
            .finalize_session(&s.id, SessionState::Rejected, "spam;bot", votes(s.id, 10))
            .await
            .unwrap();
        assert_eq!(first, CommitOutcome::Committed);

        let second = repo
            .finalize_session(&s.id, SessionState::Allowed, "again", votes(s.id, 10))
            .await
            .unwrap();
        assert_eq!(second, CommitOutcome::AlreadyFinal(SessionState::Rejected));

        assert_eq!(repo.vote_count(), 10);
        let stored = repo.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.subject, "spam;bot");
        assert_eq!(stored.state, SessionState::Rejected);
    }

    #[tokio::test]
    async fn test_finalize_to_new_is_rejected() {
        let repo = MemoryRepository::new();
        let s = session("https://forum.example/p/1");
        repo.create_session(&s).await.unwrap();

        let err = repo
            .finalize_session(&s.id, SessionState::New, "", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RasError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_void_from_terminal_fails() {
        let repo = MemoryRepository::new();
        let s = session("https://forum.example/p/1");
        repo.create_session(&s).await.unwrap();

        assert_eq!(repo.void_session(&s.id).await.unwrap().state, SessionState::Voided);
        assert!(matches!(
            repo.void_session(&s.id).await,
            Err(RasError::InvalidTransition { from: SessionState::Voided, .. })
        ));
        assert!(matches!(
            repo.void_session(&SessionId::new()).await,
            Err(RasError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_vote_listings() {
        let repo = MemoryRepository::new();
        let a = session("https://forum.example/p/1");
        let b = session("https://forum.example/p/2");
        repo.create_session(&a).await.unwrap();
        repo.create_session(&b).await.unwrap();
        repo.finalize_session(&a.id, SessionState::Rejected, "", votes(a.id, 3))
            .await
            .unwrap();
        repo.finalize_session(&b.id, SessionState::Rejected, "", votes(b.id, 2))
            .await
            .unwrap();

        assert_eq!(repo.votes_for_session(&a.id).await.unwrap().len(), 3);
        assert_eq!(repo.votes_for_post("https://forum.example/p/2").await.unwrap().len(), 2);
        assert!(repo.votes_for_post("https://nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reviewer_pool() {
        let repo = MemoryRepository::new();
        repo.add_reviewer(Reviewer::new(ReviewerId(2), "b@example.org").unwrap());
        repo.add_reviewer(Reviewer::new(ReviewerId(1), "a@example.org").unwrap());

        let pool = repo.eligible_reviewers().await.unwrap();
        assert_eq!(pool, vec![ReviewerId(1), ReviewerId(2)]);
    }
}
