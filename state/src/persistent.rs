//! Durable repository backed by sled
//!
//! Finalize runs as a multi-tree transaction over `sessions` and `votes`,
//! so a crash can never leave a decided session without its vote records.

use async_trait::async_trait;
use ras_core::{
    Accord, AccordId, CommitOutcome, FinalVoteRecord, RasError, RasResult, Reviewer, ReviewerId,
    ReviewerPool, SessionId, SessionRepository, SessionState, VotingSession,
};
use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use tracing::{debug, info};

use crate::store::{int_key_bytes, parse_int_key};

const SESSIONS_TREE: &str = "sessions";
const VOTES_TREE: &str = "votes";
const ACCORDS_TREE: &str = "accords";
const REVIEWERS_TREE: &str = "reviewers";

fn storage_err(e: sled::Error) -> RasError {
    RasError::Persistence(e.to_string())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> RasResult<T> {
    serde_json::from_slice(bytes).map_err(|e| RasError::Persistence(format!("corrupt record: {e}")))
}

fn session_key(id: &SessionId) -> [u8; 16] {
    *id.as_uuid().as_bytes()
}

/// Votes are keyed `session uuid ++ voter`, so one prefix scan lists a session
fn vote_key(id: &SessionId, voter: ReviewerId) -> Vec<u8> {
    let mut key = session_key(id).to_vec();
    key.extend_from_slice(&int_key_bytes(voter.0));
    key
}

/// Durable repository backed by a sled database
pub struct SledRepository {
    db: Db,
    sessions: Tree,
    votes: Tree,
    accords: Tree,
    reviewers: Tree,
}

impl SledRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> RasResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Self::with_db(db)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> RasResult<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(storage_err)?;
        Self::with_db(db)
    }

    fn with_db(db: Db) -> RasResult<Self> {
        let sessions = db.open_tree(SESSIONS_TREE).map_err(storage_err)?;
        let votes = db.open_tree(VOTES_TREE).map_err(storage_err)?;
        let accords = db.open_tree(ACCORDS_TREE).map_err(storage_err)?;
        let reviewers = db.open_tree(REVIEWERS_TREE).map_err(storage_err)?;

        info!(
            "Opened durable store: {} sessions, {} votes, {} reviewers",
            sessions.len(),
            votes.len(),
            reviewers.len()
        );

        Ok(Self {
            db,
            sessions,
            votes,
            accords,
            reviewers,
        })
    }

    pub fn add_accord(&self, accord: &Accord) -> RasResult<()> {
        let value = serde_json::to_vec(accord)?;
        self.accords
            .insert(int_key_bytes(accord.id.0), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn add_reviewer(&self, reviewer: &Reviewer) -> RasResult<()> {
        let value = serde_json::to_vec(reviewer)?;
        self.reviewers
            .insert(int_key_bytes(reviewer.id.0), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> RasResult<()> {
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }

    fn load_session(&self, id: &SessionId) -> RasResult<Option<VotingSession>> {
        match self.sessions.get(session_key(id)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_votes(&self, id: &SessionId) -> RasResult<Vec<FinalVoteRecord>> {
        self.votes
            .scan_prefix(session_key(id))
            .map(|item| {
                let (_, value) = item.map_err(storage_err)?;
                decode(&value)
            })
            .collect()
    }
}

fn abort<T>(err: RasError) -> Result<T, ConflictableTransactionError<RasError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<RasError>>) -> RasResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => storage_err(err),
    })
}

#[async_trait]
impl SessionRepository for SledRepository {
    async fn create_session(&self, session: &VotingSession) -> RasResult<()> {
        let value = serde_json::to_vec(session)?;
        self.sessions
            .compare_and_swap(session_key(&session.id), None as Option<&[u8]>, Some(value))
            .map_err(storage_err)?
            .map_err(|_| RasError::Persistence(format!("session {} already exists", session.id)))?;
        self.flush().await
    }

    async fn get_session(&self, id: &SessionId) -> RasResult<Option<VotingSession>> {
        self.load_session(id)
    }

    async fn get_accord(&self, id: AccordId) -> RasResult<Option<Accord>> {
        match self.accords.get(int_key_bytes(id.0)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn finalize_session(
        &self,
        id: &SessionId,
        state: SessionState,
        subject: &str,
        votes: Vec<FinalVoteRecord>,
    ) -> RasResult<CommitOutcome> {
        let key = session_key(id);
        let encoded_votes = votes
            .iter()
            .map(|v| Ok((vote_key(id, v.voter), serde_json::to_vec(v)?)))
            .collect::<RasResult<Vec<_>>>()?;

        let result: Result<CommitOutcome, TransactionError<RasError>> =
            (&self.sessions, &self.votes).transaction(|(sessions, vote_tree)| {
                let Some(raw) = sessions.get(key)? else {
                    return abort(RasError::NotFound(format!("session {id}")));
                };
                let mut session: VotingSession = match decode(&raw) {
                    Ok(s) => s,
                    Err(e) => return abort(e),
                };

                if session.state.is_terminal() {
                    return Ok(CommitOutcome::AlreadyFinal(session.state));
                }
                if !session.state.can_transition_to(state) {
                    return abort(RasError::InvalidTransition {
                        from: session.state,
                        to: state,
                    });
                }

                session.state = state;
                session.subject = subject.to_string();
                let value = match serde_json::to_vec(&session) {
                    Ok(v) => v,
                    Err(e) => return abort(RasError::from(e)),
                };
                sessions.insert(&key[..], value)?;
                for (vote_key, vote_value) in &encoded_votes {
                    vote_tree.insert(vote_key.as_slice(), vote_value.as_slice())?;
                }
                Ok(CommitOutcome::Committed)
            });

        let outcome = unwrap_tx(result)?;
        if outcome == CommitOutcome::Committed {
            self.flush().await?;
            debug!("Committed session {} as {} with {} votes", id, state, votes.len());
        }
        Ok(outcome)
    }

    async fn void_session(&self, id: &SessionId) -> RasResult<VotingSession> {
        let key = session_key(id);
        let result: Result<VotingSession, TransactionError<RasError>> =
            self.sessions.transaction(|sessions| {
                let Some(raw) = sessions.get(key)? else {
                    return abort(RasError::NotFound(format!("session {id}")));
                };
                let mut session: VotingSession = match decode(&raw) {
                    Ok(s) => s,
                    Err(e) => return abort(e),
                };
                if !session.state.can_transition_to(SessionState::Voided) {
                    return abort(RasError::InvalidTransition {
                        from: session.state,
                        to: SessionState::Voided,
                    });
                }
                session.state = SessionState::Voided;
                let value = match serde_json::to_vec(&session) {
                    Ok(v) => v,
                    Err(e) => return abort(RasError::from(e)),
                };
                sessions.insert(&key[..], value)?;
                Ok(session)
            });

        let session = unwrap_tx(result)?;
        self.flush().await?;
        Ok(session)
    }

    async fn votes_for_session(&self, id: &SessionId) -> RasResult<Vec<FinalVoteRecord>> {
        self.scan_votes(id)
    }

    async fn votes_for_post(&self, post_uri: &str) -> RasResult<Vec<FinalVoteRecord>> {
        let mut votes = Vec::new();
        for item in self.sessions.iter() {
            let (_, value) = item.map_err(storage_err)?;
            let session: VotingSession = decode(&value)?;
            if session.post_uri == post_uri {
                votes.extend(self.scan_votes(&session.id)?);
            }
        }
        Ok(votes)
    }
}

#[async_trait]
impl ReviewerPool for SledRepository {
    async fn eligible_reviewers(&self) -> RasResult<Vec<ReviewerId>> {
        self.reviewers
            .iter()
            .keys()
            .map(|key| {
                let key = key.map_err(storage_err)?;
                parse_int_key(&key)
                    .map(ReviewerId)
                    .ok_or_else(|| RasError::Persistence("malformed reviewer key".into()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_core::{Decision, NewSession, Timestamp};

    fn session() -> VotingSession {
        VotingSession::new(&NewSession {
            subject: "flagged".into(),
            post_uri: "https://forum.example/p/9".into(),
            redirect_uri: "https://mod.example/hook".into(),
            accord: AccordId(3),
        })
    }

    fn votes(id: SessionId, n: i64) -> Vec<FinalVoteRecord> {
        (0..n)
            .map(|i| FinalVoteRecord {
                ras_id: id,
                voter: ReviewerId(i),
                state: if i % 2 == 0 { Decision::Allowed } else { Decision::Abstained },
                note: format!("n{i}"),
                created_at: Timestamp::now(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let repo = SledRepository::temporary().unwrap();
        let s = session();
        repo.create_session(&s).await.unwrap();

        assert_eq!(repo.get_session(&s.id).await.unwrap(), Some(s.clone()));
        assert!(repo.get_session(&SessionId::new()).await.unwrap().is_none());
        assert!(repo.create_session(&s).await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_writes_state_and_votes_together() {
        let repo = SledRepository::temporary().unwrap();
        let s = session();
        repo.create_session(&s).await.unwrap();

        let outcome = repo
            .finalize_session(&s.id, SessionState::Allowed, "flagged;n0", votes(s.id, 10))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
        assert_eq!(repo.vote_count(), 10);

        let again = repo
            .finalize_session(&s.id, SessionState::Rejected, "x", votes(s.id, 10))
            .await
            .unwrap();
        assert_eq!(again, CommitOutcome::AlreadyFinal(SessionState::Allowed));

        let stored = repo.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Allowed);
        assert_eq!(stored.subject, "flagged;n0");
        assert_eq!(repo.votes_for_session(&s.id).await.unwrap().len(), 10);
        assert_eq!(repo.votes_for_post(&s.post_uri).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_aborted_finalize_writes_nothing() {
        let repo = SledRepository::temporary().unwrap();
        let s = session();
        repo.create_session(&s).await.unwrap();

        let err = repo
            .finalize_session(&s.id, SessionState::New, "x", votes(s.id, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, RasError::InvalidTransition { .. }));
        assert_eq!(repo.vote_count(), 0);

        let missing = repo
            .finalize_session(&SessionId::new(), SessionState::Allowed, "x", votes(s.id, 1))
            .await;
        assert!(matches!(missing, Err(RasError::NotFound(_))));
        assert_eq!(repo.vote_count(), 0);
    }

    #[tokio::test]
    async fn test_void_session() {
        let repo = SledRepository::temporary().unwrap();
        let s = session();
        repo.create_session(&s).await.unwrap();

        assert_eq!(repo.void_session(&s.id).await.unwrap().state, SessionState::Voided);
        assert!(matches!(
            repo.void_session(&s.id).await,
            Err(RasError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_accords_and_reviewers() {
        let repo = SledRepository::temporary().unwrap();
        repo.add_accord(&Accord {
            id: AccordId(3),
            name: "general".into(),
            about: String::new(),
        })
        .unwrap();
        for id in [5, -2, 40] {
            repo.add_reviewer(&Reviewer::new(ReviewerId(id), "r@example.org").unwrap())
                .unwrap();
        }

        assert_eq!(repo.get_accord(AccordId(3)).await.unwrap().unwrap().name, "general");
        assert!(repo.get_accord(AccordId(4)).await.unwrap().is_none());
        assert_eq!(
            repo.eligible_reviewers().await.unwrap(),
            vec![ReviewerId(-2), ReviewerId(5), ReviewerId(40)]
        );
    }
}
