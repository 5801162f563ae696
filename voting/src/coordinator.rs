//! Voting session coordinator
//!
//! Pending votes live in the ephemeral store under the session id; each
//! reviewer's open assignments live under the reviewer id. Everything that
//! touches one session's pending record runs under that session's lock, and
//! each reviewer index is rewritten under that reviewer's lock, so a session
//! is finalized at most once per process and the durable conditional commit
//! covers the rest.

use crate::selector::PanelSelector;
use crate::tally::{audit_subject, final_records, Tally};
use dashmap::DashMap;
use ras_core::{
    Ballot, CommitOutcome, EphemeralStore, FinalVoteRecord, IdentityVerifier, NewSession,
    OutcomeNotifier, RasError, RasResult, ReviewerId, ReviewerPool, SessionId, SessionOutcome,
    SessionRepository, SessionState, SessionSummary, VoteSlot, VotingConfig, VotingSession,
};
use ras_state::{StoreKey, TypedStore};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Log target for outcome callback failures
pub const WEBHOOK_TARGET: &str = "ras_voting::webhook";

/// Events emitted by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum VotingEvent {
    /// Session opened with its panel
    SessionCreated(SessionId, Vec<ReviewerId>),
    /// A panelist's vote was recorded
    VoteCast(SessionId, ReviewerId),
    /// Session reached a final decision and was persisted
    SessionFinalized(SessionId, SessionState),
    /// Session was voided by an administrator
    SessionVoided(SessionId),
}

/// Result of a recorded vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Recorded; the session is still open
    Pending,
    /// The vote closed the session
    Finalized(SessionState),
}

/// Async mutexes keyed by id. An entry exists only while a task holds or
/// waits on it.
struct LockTable<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Copy> LockTable<K> {
    fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Run `op` while holding the lock for `key`
    async fn run<T>(&self, key: K, op: impl Future<Output = T>) -> T {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            op.await
        };

        // Only the table and this task still reference the lock
        self.locks
            .remove_if(&key, |_, held| Arc::strong_count(held) <= 2);
        result
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Owns the lifecycle of voting sessions
pub struct Coordinator {
    config: VotingConfig,
    selector: PanelSelector,
    store: Arc<dyn EphemeralStore>,
    repository: Arc<dyn SessionRepository>,
    pool: Arc<dyn ReviewerPool>,
    verifier: Arc<dyn IdentityVerifier>,
    notifier: Arc<dyn OutcomeNotifier>,
    session_locks: LockTable<SessionId>,
    index_locks: LockTable<ReviewerId>,
    event_tx: Option<mpsc::Sender<VotingEvent>>,
}

impl Coordinator {
    pub fn new(
        config: VotingConfig,
        store: Arc<dyn EphemeralStore>,
        repository: Arc<dyn SessionRepository>,
        pool: Arc<dyn ReviewerPool>,
        verifier: Arc<dyn IdentityVerifier>,
        notifier: Arc<dyn OutcomeNotifier>,
    ) -> Self {
        Self {
            selector: PanelSelector::new(config.panel_size),
            config,
            store,
            repository,
            pool,
            verifier,
            notifier,
            session_locks: LockTable::new(),
            index_locks: LockTable::new(),
            event_tx: None,
        }
    }

    /// Set event channel
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<VotingEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn config(&self) -> &VotingConfig {
        &self.config
    }

    /// Open a session: persist it, draw a panel, and seed the store
    pub async fn create_session(&self, request: NewSession) -> RasResult<SessionId> {
        request.validate()?;

        if self.repository.get_accord(request.accord).await?.is_none() {
            return Err(RasError::NotFound(format!("accord {}", request.accord.0)));
        }

        let eligible = self.pool.eligible_reviewers().await?;
        let panel = self.selector.select(&eligible)?;

        let session = VotingSession::new(&request);
        self.repository.create_session(&session).await?;

        if let Err(e) = self.seed_pending(&session, &panel).await {
            error!("Session {} is stored but its pending votes are not: {}", session.id, e);
            return Err(e);
        }

        info!(
            "Created session {} on {} with a panel of {}",
            session.id,
            session.post_uri,
            panel.len()
        );
        self.emit_event(VotingEvent::SessionCreated(session.id, panel));

        Ok(session.id)
    }

    async fn seed_pending(&self, session: &VotingSession, panel: &[ReviewerId]) -> RasResult<()> {
        let slots: Vec<VoteSlot> = panel.iter().copied().map(VoteSlot::unset).collect();
        self.store
            .put_json(&StoreKey::from(session.id), &slots, None)
            .await?;

        let summary = session.summary();
        for reviewer in panel {
            self.index_locks
                .run(*reviewer, self.link(*reviewer, &summary))
                .await?;
        }
        Ok(())
    }

    /// First open session on which `reviewer` still owes a vote
    pub async fn get_assignment(&self, reviewer: ReviewerId) -> RasResult<Option<SessionSummary>> {
        for summary in self.load_index(reviewer).await? {
            let Some(slots) = self.load_pending(&summary.ras_id).await? else {
                continue;
            };
            if slots.iter().any(|s| s.user_id == reviewer && !s.is_set()) {
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }

    /// Authenticate `credential` and record its holder's ballot
    pub async fn cast_vote(&self, credential: &str, ballot: Ballot) -> RasResult<VoteOutcome> {
        let voter = self.verifier.verify(credential).await?;
        self.record_vote(voter, ballot).await
    }

    /// Record a ballot for an already authenticated reviewer.
    ///
    /// A vote that closes the session is stored only through the durable
    /// commit. If that commit fails the pending record is left as it was
    /// before the vote, so the same voter can submit again.
    pub async fn record_vote(&self, voter: ReviewerId, ballot: Ballot) -> RasResult<VoteOutcome> {
        ballot.validate()?;
        let id = ballot.ras_id;
        self.session_locks
            .run(id, self.record_vote_locked(voter, ballot))
            .await
    }

    async fn record_vote_locked(
        &self,
        voter: ReviewerId,
        ballot: Ballot,
    ) -> RasResult<VoteOutcome> {
        let id = ballot.ras_id;
        let mut slots = self
            .load_pending(&id)
            .await?
            .ok_or(RasError::SessionUnavailable)?;

        let slot = slots
            .iter_mut()
            .find(|s| s.user_id == voter)
            .ok_or(RasError::NotAPanelist)?;
        if slot.is_set() {
            return Err(RasError::AlreadyVoted);
        }
        slot.state = Some(ballot.state);
        slot.note = ballot.note;

        let tally = Tally::from_slots(&slots);
        debug!("Vote by {} on session {} ({}); tally {:?}", voter, id, ballot.state, tally);

        let outcome = match tally.decide(self.config.quorum_threshold) {
            None => {
                self.store.put_json(&StoreKey::from(id), &slots, None).await?;
                VoteOutcome::Pending
            }
            Some(state) => VoteOutcome::Finalized(self.finalize_locked(&id, &slots, state).await?),
        };

        self.emit_event(VotingEvent::VoteCast(id, voter));
        Ok(outcome)
    }

    /// Close a session with the given slots.
    ///
    /// The outcome is derived from `slots`; a session that is not yet
    /// decisive closes as its current tally would.
    pub async fn finalize(&self, id: &SessionId, slots: Vec<VoteSlot>) -> RasResult<SessionState> {
        let state = Tally::from_slots(&slots).outcome(self.config.quorum_threshold);
        self.session_locks
            .run(*id, self.finalize_locked(id, &slots, state))
            .await
    }

    /// Caller holds the session lock
    async fn finalize_locked(
        &self,
        id: &SessionId,
        slots: &[VoteSlot],
        state: SessionState,
    ) -> RasResult<SessionState> {
        let session = self
            .repository
            .get_session(id)
            .await?
            .ok_or_else(|| RasError::NotFound(format!("session {id}")))?;

        let subject = audit_subject(&session.subject, slots);
        let records: Vec<FinalVoteRecord> = final_records(*id, slots);

        let commit = match self
            .repository
            .finalize_session(id, state, &subject, records)
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                error!("Failed to persist outcome {} of session {}: {}", state, id, e);
                return Err(e);
            }
        };

        let final_state = match commit {
            CommitOutcome::Committed => {
                info!("Session {} finalized as {}", id, state);
                self.dispatch_outcome(SessionOutcome {
                    ras_id: *id,
                    state,
                    subject,
                    redirect_uri: session.redirect_uri,
                });
                self.emit_event(VotingEvent::SessionFinalized(*id, state));
                state
            }
            CommitOutcome::AlreadyFinal(previous) => {
                warn!("Session {} was already {}; clearing leftover state", id, previous);
                previous
            }
        };

        self.clear_pending(id, slots).await;
        Ok(final_state)
    }

    /// Administratively close an open session without an outcome
    pub async fn void_session(&self, id: &SessionId) -> RasResult<VotingSession> {
        self.session_locks.run(*id, self.void_locked(id)).await
    }

    async fn void_locked(&self, id: &SessionId) -> RasResult<VotingSession> {
        let slots = self.load_pending(id).await?.unwrap_or_default();
        let session = self.repository.void_session(id).await?;
        self.clear_pending(id, &slots).await;

        info!("Session {} voided", id);
        self.emit_event(VotingEvent::SessionVoided(*id));
        Ok(session)
    }

    pub async fn get_session(&self, id: &SessionId) -> RasResult<VotingSession> {
        self.repository
            .get_session(id)
            .await?
            .ok_or_else(|| RasError::NotFound(format!("session {id}")))
    }

    pub async fn votes_for_session(&self, id: &SessionId) -> RasResult<Vec<FinalVoteRecord>> {
        self.repository.votes_for_session(id).await
    }

    pub async fn votes_for_post(&self, post_uri: &str) -> RasResult<Vec<FinalVoteRecord>> {
        self.repository.votes_for_post(post_uri).await
    }

    /// Pending slots of an open session, if the store still holds them
    pub async fn pending_slots(&self, id: &SessionId) -> RasResult<Option<Vec<VoteSlot>>> {
        self.load_pending(id).await
    }

    /// Session and reviewer lock entries currently held or awaited
    pub fn active_locks(&self) -> usize {
        self.session_locks.len() + self.index_locks.len()
    }

    async fn load_pending(&self, id: &SessionId) -> RasResult<Option<Vec<VoteSlot>>> {
        match self.store.get_json(&StoreKey::from(*id)).await {
            Ok(slots) => Ok(Some(slots)),
            Err(RasError::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn load_index(&self, reviewer: ReviewerId) -> RasResult<Vec<SessionSummary>> {
        match self.store.get_json(&StoreKey::from(reviewer)).await {
            Ok(index) => Ok(index),
            Err(RasError::KeyNotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Drop the pending record and unlink the session from every panelist.
    /// Failures here are logged; the durable state is already settled.
    async fn clear_pending(&self, id: &SessionId, slots: &[VoteSlot]) {
        if let Err(e) = self.store.delete_key(&StoreKey::from(*id)).await {
            warn!("Failed to delete pending votes of session {}: {}", id, e);
        }

        for slot in slots {
            let reviewer = slot.user_id;
            if let Err(e) = self.index_locks.run(reviewer, self.unlink(reviewer, id)).await {
                warn!("Failed to update index of {} for session {}: {}", reviewer, id, e);
            }
        }
    }

    /// Caller holds the reviewer's index lock
    async fn link(&self, reviewer: ReviewerId, summary: &SessionSummary) -> RasResult<()> {
        let mut index = self.load_index(reviewer).await?;
        index.push(summary.clone());
        self.store
            .put_json(&StoreKey::from(reviewer), &index, None)
            .await
    }

    /// Caller holds the reviewer's index lock
    async fn unlink(&self, reviewer: ReviewerId, id: &SessionId) -> RasResult<()> {
        let key = StoreKey::from(reviewer);
        let mut index = self.load_index(reviewer).await?;
        let before = index.len();
        index.retain(|s| s.ras_id != *id);

        if index.is_empty() {
            self.store.delete_key(&key).await?;
        } else if index.len() != before {
            self.store.put_json(&key, &index, None).await?;
        }
        Ok(())
    }

    fn dispatch_outcome(&self, outcome: SessionOutcome) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&outcome).await {
                warn!(
                    target: WEBHOOK_TARGET,
                    "Outcome callback for session {} to {} failed: {}",
                    outcome.ras_id,
                    outcome.redirect_uri,
                    e
                );
            }
        });
    }

    fn emit_event(&self, event: VotingEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Shared coordinator
pub type SharedCoordinator = Arc<Coordinator>;

/// Create coordinator event channel
pub fn create_voting_channel() -> (mpsc::Sender<VotingEvent>, mpsc::Receiver<VotingEvent>) {
    mpsc::channel(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ras_core::{Accord, AccordId, Decision, Reviewer};
    use ras_state::{MemoryBox, MemoryRepository};
    use std::collections::HashMap;
    use std::time::Duration;

    struct StaticVerifier(HashMap<String, ReviewerId>);

    #[async_trait]
    impl IdentityVerifier for StaticVerifier {
        async fn verify(&self, credential: &str) -> RasResult<ReviewerId> {
            self.0.get(credential).copied().ok_or(RasError::Unauthorized)
        }
    }

    struct ChannelNotifier(mpsc::UnboundedSender<SessionOutcome>);

    #[async_trait]
    impl OutcomeNotifier for ChannelNotifier {
        async fn notify(&self, outcome: &SessionOutcome) -> RasResult<()> {
            let _ = self.0.send(outcome.clone());
            Ok(())
        }
    }

    struct Harness {
        coordinator: Coordinator,
        store: Arc<MemoryBox>,
        repository: Arc<MemoryRepository>,
        outcomes: mpsc::UnboundedReceiver<SessionOutcome>,
    }

    fn harness(pool_size: i64) -> Harness {
        harness_with_ttl(pool_size, Duration::from_secs(3600))
    }

    fn harness_with_ttl(pool_size: i64, ttl: Duration) -> Harness {
        let store = Arc::new(MemoryBox::new(1 << 20, 16, ttl));
        let repository = Arc::new(MemoryRepository::new());
        repository.add_accord(Accord {
            id: AccordId(1),
            name: "general".into(),
            about: String::new(),
        });
        let mut tokens = HashMap::new();
        for id in 1..=pool_size {
            repository.add_reviewer(Reviewer::new(ReviewerId(id), "r@example.org").unwrap());
            tokens.insert(format!("token-{id}"), ReviewerId(id));
        }
        let (tx, outcomes) = mpsc::unbounded_channel();

        let coordinator = Coordinator::new(
            VotingConfig::default(),
            store.clone(),
            repository.clone(),
            repository.clone(),
            Arc::new(StaticVerifier(tokens)),
            Arc::new(ChannelNotifier(tx)),
        );
        Harness {
            coordinator,
            store,
            repository,
            outcomes,
        }
    }

    fn request() -> NewSession {
        NewSession {
            subject: "Is this post spam?".into(),
            post_uri: "https://forum.example/p/42".into(),
            redirect_uri: "https://mod.example/hook".into(),
            accord: AccordId(1),
        }
    }

    fn ballot(id: SessionId, state: Decision) -> Ballot {
        Ballot {
            ras_id: id,
            state,
            note: String::new(),
        }
    }

    async fn panel(h: &Harness, id: SessionId) -> Vec<ReviewerId> {
        h.coordinator
            .pending_slots(&id)
            .await
            .unwrap()
            .unwrap()
            .iter()
            .map(|s| s.user_id)
            .collect()
    }

    #[tokio::test]
    async fn test_create_session_seeds_store() {
        let h = harness(12);
        let id = h.coordinator.create_session(request()).await.unwrap();

        let members = panel(&h, id).await;
        assert_eq!(members.len(), 10);
        for member in &members {
            let assignment = h.coordinator.get_assignment(*member).await.unwrap().unwrap();
            assert_eq!(assignment.ras_id, id);
            assert_eq!(assignment.post_uri, "https://forum.example/p/42");
        }
        assert_eq!(
            h.repository.get_session(&id).await.unwrap().unwrap().state,
            SessionState::New
        );
    }

    #[tokio::test]
    async fn test_create_session_rejects_unknown_accord() {
        let h = harness(12);
        let mut req = request();
        req.accord = AccordId(99);
        assert!(matches!(
            h.coordinator.create_session(req).await,
            Err(RasError::NotFound(_))
        ));
        assert_eq!(h.repository.session_count(), 0);
    }

    #[tokio::test]
    async fn test_small_pool_creates_nothing() {
        let h = harness(9);
        let err = h.coordinator.create_session(request()).await.unwrap_err();
        assert!(matches!(err, RasError::InsufficientReviewers { .. }));
        assert_eq!(h.repository.session_count(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_skips_decided_sessions() {
        let h = harness(10);
        let first = h.coordinator.create_session(request()).await.unwrap();
        let second = h.coordinator.create_session(request()).await.unwrap();

        let me = ReviewerId(3);
        assert_eq!(h.coordinator.get_assignment(me).await.unwrap().unwrap().ras_id, first);

        h.coordinator
            .record_vote(me, ballot(first, Decision::Allowed))
            .await
            .unwrap();
        assert_eq!(h.coordinator.get_assignment(me).await.unwrap().unwrap().ras_id, second);

        h.coordinator
            .record_vote(me, ballot(second, Decision::Allowed))
            .await
            .unwrap();
        assert!(h.coordinator.get_assignment(me).await.unwrap().is_none());
        assert!(h.coordinator.get_assignment(ReviewerId(77)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vote_errors() {
        let h = harness(11);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let members = panel(&h, id).await;
        let outsider = (1..=11)
            .map(ReviewerId)
            .find(|r| !members.contains(r))
            .unwrap();

        assert!(matches!(
            h.coordinator.cast_vote("forged", ballot(id, Decision::Allowed)).await,
            Err(RasError::Unauthorized)
        ));
        assert!(matches!(
            h.coordinator
                .cast_vote(&format!("token-{}", outsider.0), ballot(id, Decision::Allowed))
                .await,
            Err(RasError::NotAPanelist)
        ));
        assert!(matches!(
            h.coordinator
                .record_vote(members[0], ballot(SessionId::new(), Decision::Allowed))
                .await,
            Err(RasError::SessionUnavailable)
        ));

        let token = format!("token-{}", members[0].0);
        assert_eq!(
            h.coordinator.cast_vote(&token, ballot(id, Decision::Rejected)).await.unwrap(),
            VoteOutcome::Pending
        );
        assert!(matches!(
            h.coordinator.cast_vote(&token, ballot(id, Decision::Allowed)).await,
            Err(RasError::AlreadyVoted)
        ));
    }

    #[tokio::test]
    async fn test_quorum_finalizes_and_cleans_up() {
        let mut h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let members = panel(&h, id).await;

        for (i, member) in members.iter().take(3).enumerate() {
            let mut b = ballot(id, Decision::Allowed);
            b.note = format!("note {i}");
            assert_eq!(
                h.coordinator.record_vote(*member, b).await.unwrap(),
                VoteOutcome::Pending
            );
        }
        let outcome = h
            .coordinator
            .record_vote(members[3], ballot(id, Decision::Allowed))
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Finalized(SessionState::Allowed));

        let stored = h.coordinator.get_session(&id).await.unwrap();
        assert_eq!(stored.state, SessionState::Allowed);
        assert_eq!(stored.subject, "Is this post spam?;note 0;note 1;note 2");

        let votes = h.coordinator.votes_for_session(&id).await.unwrap();
        assert_eq!(votes.len(), 10);
        assert_eq!(votes.iter().filter(|v| v.state == Decision::Abstained).count(), 6);

        assert!(h.coordinator.pending_slots(&id).await.unwrap().is_none());
        assert!(h.store.is_empty());
        assert_eq!(h.coordinator.active_locks(), 0);

        let sent = tokio::time::timeout(Duration::from_secs(1), h.outcomes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.state, SessionState::Allowed);
        assert_eq!(sent.redirect_uri, "https://mod.example/hook");

        assert!(matches!(
            h.coordinator
                .record_vote(members[4], ballot(id, Decision::Rejected))
                .await,
            Err(RasError::SessionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_void_session() {
        let mut h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();

        let voided = h.coordinator.void_session(&id).await.unwrap();
        assert_eq!(voided.state, SessionState::Voided);
        assert!(h.store.is_empty());
        assert!(h.coordinator.votes_for_session(&id).await.unwrap().is_empty());
        assert!(matches!(
            h.coordinator.void_session(&id).await,
            Err(RasError::InvalidTransition { .. })
        ));

        tokio::task::yield_now().await;
        assert!(h.outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_session_is_unavailable() {
        let h = harness_with_ttl(10, Duration::from_millis(50));
        let id = h.coordinator.create_session(request()).await.unwrap();
        let member = panel(&h, id).await[0];
        assert!(h.coordinator.get_assignment(member).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(
            h.coordinator
                .record_vote(member, ballot(id, Decision::Allowed))
                .await,
            Err(RasError::SessionUnavailable)
        ));
        assert!(h.coordinator.get_assignment(member).await.unwrap().is_none());
        assert_eq!(h.coordinator.active_locks(), 0);
        assert_eq!(
            h.coordinator.get_session(&id).await.unwrap().state,
            SessionState::New
        );
    }

    #[tokio::test]
    async fn test_evicted_pending_record_is_unavailable() {
        let h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let member = panel(&h, id).await[0];

        // The reviewer index survives; only the pending record is gone
        h.store.remove(StoreKey::from(id).as_bytes());

        assert!(h.coordinator.get_assignment(member).await.unwrap().is_none());
        assert!(matches!(
            h.coordinator
                .record_vote(member, ballot(id, Decision::Rejected))
                .await,
            Err(RasError::SessionUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_oversized_note_rejected() {
        let h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let member = panel(&h, id).await[0];

        let mut b = ballot(id, Decision::Allowed);
        b.note = "x".repeat(ras_core::MAX_NOTE_LEN + 1);
        assert!(matches!(
            h.coordinator.record_vote(member, b).await,
            Err(RasError::Validation(_))
        ));
        assert!(h.coordinator.get_assignment(member).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_subject_creates_nothing() {
        let h = harness(10);
        let mut req = request();
        req.subject = "x".repeat(300 * 1024);
        assert!(matches!(
            h.coordinator.create_session(req).await,
            Err(RasError::Validation(_))
        ));
        assert_eq!(h.repository.session_count(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_pending_vote_releases_lock() {
        let h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let member = panel(&h, id).await[0];

        assert_eq!(
            h.coordinator
                .record_vote(member, ballot(id, Decision::Allowed))
                .await
                .unwrap(),
            VoteOutcome::Pending
        );
        assert_eq!(h.coordinator.active_locks(), 0);

        assert!(h
            .coordinator
            .record_vote(member, ballot(id, Decision::Allowed))
            .await
            .is_err());
        assert_eq!(h.coordinator.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_explicit_finalize_uses_given_slots() {
        let h = harness(10);
        let id = h.coordinator.create_session(request()).await.unwrap();
        let mut slots = h.coordinator.pending_slots(&id).await.unwrap().unwrap();
        for slot in slots.iter_mut().take(4) {
            slot.state = Some(Decision::Rejected);
        }

        let state = h.coordinator.finalize(&id, slots).await.unwrap();
        assert_eq!(state, SessionState::Rejected);
        assert_eq!(h.repository.vote_count(), 10);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let mut h = harness(10);
        let (tx, mut rx) = create_voting_channel();
        h.coordinator.set_event_channel(tx);

        let id = h.coordinator.create_session(request()).await.unwrap();
        match rx.recv().await.unwrap() {
            VotingEvent::SessionCreated(created, members) => {
                assert_eq!(created, id);
                assert_eq!(members.len(), 10);
            }
            other => panic!("unexpected event {other:?}"),
        }

        h.coordinator
            .record_vote(ReviewerId(1), ballot(id, Decision::Abstained))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), VotingEvent::VoteCast(id, ReviewerId(1)));
    }
}
