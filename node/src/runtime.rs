//! Node runtime wiring the store, repository and coordinator together

use crate::auth::TokenRegistry;
use crate::seed::SeedConfig;
use ras_core::{
    Accord, OutcomeNotifier, RasConfig, RasResult, Reviewer, ReviewerPool, SessionRepository,
    StorageBackend, StorageConfig, Timestamp,
};
use ras_state::{
    create_memory_box, create_memory_repository, SharedMemoryBox, SharedMemoryRepository,
    SledRepository, StoreStats,
};
use ras_voting::{
    create_voting_channel, Coordinator, HttpNotifier, SharedCoordinator, VotingEvent,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Durable repository selected by configuration
#[derive(Clone)]
pub enum DurableStore {
    Memory(SharedMemoryRepository),
    Sled(Arc<SledRepository>),
}

impl DurableStore {
    pub fn open(config: &StorageConfig) -> RasResult<Self> {
        match config.backend {
            StorageBackend::Memory => Ok(DurableStore::Memory(create_memory_repository())),
            StorageBackend::Sled => {
                std::fs::create_dir_all(&config.data_dir)?;
                let repo = SledRepository::open(config.data_dir.join("ras.sled"))?;
                Ok(DurableStore::Sled(Arc::new(repo)))
            }
        }
    }

    pub fn add_accord(&self, accord: Accord) -> RasResult<()> {
        match self {
            DurableStore::Memory(repo) => {
                repo.add_accord(accord);
                Ok(())
            }
            DurableStore::Sled(repo) => repo.add_accord(&accord),
        }
    }

    pub fn add_reviewer(&self, reviewer: Reviewer) -> RasResult<()> {
        match self {
            DurableStore::Memory(repo) => {
                repo.add_reviewer(reviewer);
                Ok(())
            }
            DurableStore::Sled(repo) => repo.add_reviewer(&reviewer),
        }
    }

    pub fn session_count(&self) -> usize {
        match self {
            DurableStore::Memory(repo) => repo.session_count(),
            DurableStore::Sled(repo) => repo.session_count(),
        }
    }

    pub fn vote_count(&self) -> usize {
        match self {
            DurableStore::Memory(repo) => repo.vote_count(),
            DurableStore::Sled(repo) => repo.vote_count(),
        }
    }

    fn sessions(&self) -> Arc<dyn SessionRepository> {
        match self {
            DurableStore::Memory(repo) => repo.clone(),
            DurableStore::Sled(repo) => repo.clone(),
        }
    }

    fn pool(&self) -> Arc<dyn ReviewerPool> {
        match self {
            DurableStore::Memory(repo) => repo.clone(),
            DurableStore::Sled(repo) => repo.clone(),
        }
    }
}

/// Counters fed by coordinator events
#[derive(Debug, Default)]
pub struct VotingCounters {
    pub sessions_created: AtomicU64,
    pub votes_cast: AtomicU64,
    pub sessions_finalized: AtomicU64,
    pub sessions_voided: AtomicU64,
}

impl VotingCounters {
    fn record(&self, event: &VotingEvent) {
        let counter = match event {
            VotingEvent::SessionCreated(..) => &self.sessions_created,
            VotingEvent::VoteCast(..) => &self.votes_cast,
            VotingEvent::SessionFinalized(..) => &self.sessions_finalized,
            VotingEvent::SessionVoided(..) => &self.sessions_voided,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Node status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub started_at: u64,
    pub backend: StorageBackend,
    pub sessions: usize,
    pub final_votes: usize,
    pub open_locks: usize,
    pub sessions_created: u64,
    pub votes_cast: u64,
    pub sessions_finalized: u64,
    pub sessions_voided: u64,
    pub store: StoreStats,
}

/// Node runtime managing all components
pub struct NodeRuntime {
    config: RasConfig,
    store: SharedMemoryBox,
    durable: DurableStore,
    tokens: Arc<TokenRegistry>,
    coordinator: SharedCoordinator,
    counters: Arc<VotingCounters>,
    events: parking_lot::Mutex<Option<mpsc::Receiver<VotingEvent>>>,
    started_at: Timestamp,
}

impl NodeRuntime {
    /// Create a runtime that posts outcomes over HTTP
    pub fn new(config: RasConfig) -> RasResult<Self> {
        let notifier = Arc::new(HttpNotifier::new(config.webhook.timeout())?);
        Self::with_notifier(config, notifier)
    }

    /// Create a runtime with a custom outcome notifier
    pub fn with_notifier(config: RasConfig, notifier: Arc<dyn OutcomeNotifier>) -> RasResult<Self> {
        config.validate()?;

        let store = create_memory_box(&config.store);
        let durable = DurableStore::open(&config.storage)?;
        let tokens = Arc::new(TokenRegistry::new());

        let mut coordinator = Coordinator::new(
            config.voting.clone(),
            store.clone(),
            durable.sessions(),
            durable.pool(),
            tokens.clone(),
            notifier,
        );
        let (tx, rx) = create_voting_channel();
        coordinator.set_event_channel(tx);

        info!(
            "Runtime {} ready: panel {}, quorum {}, {:?} backend, {} byte store entries",
            config.name,
            config.voting.panel_size,
            config.voting.quorum_threshold,
            config.storage.backend,
            store.stats().max_entry_bytes
        );

        Ok(Self {
            config,
            store,
            durable,
            tokens,
            coordinator: Arc::new(coordinator),
            counters: Arc::new(VotingCounters::default()),
            events: parking_lot::Mutex::new(Some(rx)),
            started_at: Timestamp::now(),
        })
    }

    /// Load accords, reviewers and their tokens
    pub fn apply_seed(&self, seed: &SeedConfig) -> RasResult<()> {
        seed.validate()?;

        for accord in &seed.accords {
            self.durable.add_accord(accord.clone())?;
        }
        for (reviewer, token) in seed.reviewer_records()? {
            self.tokens.insert(token, reviewer.id);
            self.durable.add_reviewer(reviewer)?;
        }

        info!(
            "Seeded {} accords and {} reviewers",
            seed.accords.len(),
            seed.reviewers.len()
        );
        Ok(())
    }

    /// Start the store sweeper and the event counter. Call once, inside a
    /// tokio runtime.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.spawn_sweeper()];

        if let Some(mut rx) = self.events.lock().take() {
            let counters = self.counters.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    debug!("Voting event: {:?}", event);
                    counters.record(&event);
                }
            }));
        }
        handles
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let period = Duration::from_secs(self.config.store.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    info!("Sweeper dropped {} expired store entries", purged);
                }
            }
        })
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.config.name.clone(),
            started_at: self.started_at.as_millis(),
            backend: self.config.storage.backend,
            sessions: self.durable.session_count(),
            final_votes: self.durable.vote_count(),
            open_locks: self.coordinator.active_locks(),
            sessions_created: self.counters.sessions_created.load(Ordering::Relaxed),
            votes_cast: self.counters.votes_cast.load(Ordering::Relaxed),
            sessions_finalized: self.counters.sessions_finalized.load(Ordering::Relaxed),
            sessions_voided: self.counters.sessions_voided.load(Ordering::Relaxed),
            store: self.store.stats(),
        }
    }

    pub fn coordinator(&self) -> &SharedCoordinator {
        &self.coordinator
    }

    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.tokens
    }

    pub fn store(&self) -> &SharedMemoryBox {
        &self.store
    }

    pub fn config(&self) -> &RasConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_core::{AccordId, Ballot, Decision, NewSession, ReviewerId, SessionState};
    use ras_voting::{NoopNotifier, VoteOutcome};

    fn create_test_runtime() -> NodeRuntime {
        let runtime =
            NodeRuntime::with_notifier(RasConfig::default(), Arc::new(NoopNotifier)).unwrap();
        runtime.apply_seed(&SeedConfig::sample()).unwrap();
        runtime
    }

    fn request() -> NewSession {
        NewSession {
            subject: "Off-topic?".into(),
            post_uri: "https://forum.example/p/8".into(),
            redirect_uri: "https://mod.example/hook".into(),
            accord: AccordId(1),
        }
    }

    #[tokio::test]
    async fn test_runtime_creation() {
        let runtime = create_test_runtime();
        let status = runtime.status();

        assert_eq!(status.sessions, 0);
        assert_eq!(status.backend, StorageBackend::Memory);
        assert_eq!(runtime.tokens().len(), 12);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = RasConfig::default();
        config.voting.quorum_threshold = 0;
        assert!(NodeRuntime::with_notifier(config, Arc::new(NoopNotifier)).is_err());
    }

    #[tokio::test]
    async fn test_seeded_tokens_can_vote() {
        let runtime = create_test_runtime();
        let id = runtime.coordinator().create_session(request()).await.unwrap();

        let slots = runtime.coordinator().pending_slots(&id).await.unwrap().unwrap();
        let mut outcome = VoteOutcome::Pending;
        for slot in slots.iter().take(4) {
            let token = format!("reviewer-{}-token", slot.user_id.0);
            outcome = runtime
                .coordinator()
                .cast_vote(
                    &token,
                    Ballot {
                        ras_id: id,
                        state: Decision::Rejected,
                        note: String::new(),
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(outcome, VoteOutcome::Finalized(SessionState::Rejected));
        assert_eq!(runtime.status().final_votes, 10);
        assert!(runtime.coordinator().get_assignment(ReviewerId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_counters() {
        let runtime = create_test_runtime();
        let handles = runtime.spawn_background();

        let id = runtime.coordinator().create_session(request()).await.unwrap();
        runtime.coordinator().void_session(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = runtime.status();
        assert_eq!(status.sessions_created, 1);
        assert_eq!(status.sessions_voided, 1);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_sled_backend() {
        let dir = std::env::temp_dir().join(format!("ras-runtime-{}", ras_core::SessionId::new()));
        let mut config = RasConfig::default();
        config.storage = StorageConfig {
            backend: StorageBackend::Sled,
            data_dir: dir.clone(),
        };

        {
            let runtime = NodeRuntime::with_notifier(config, Arc::new(NoopNotifier)).unwrap();
            runtime.apply_seed(&SeedConfig::sample()).unwrap();
            runtime.coordinator().create_session(request()).await.unwrap();
            assert_eq!(runtime.status().sessions, 1);
        }
        let _ = std::fs::remove_dir_all(dir);
    }
}
