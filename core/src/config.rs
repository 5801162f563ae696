//! Configuration types for RAS

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RasError;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasConfig {
    /// Node name for logging
    pub name: String,

    /// Ephemeral store configuration
    pub store: StoreConfig,

    /// Panel and quorum configuration
    pub voting: VotingConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Durable storage configuration
    pub storage: StorageConfig,

    /// Outcome callback configuration
    pub webhook: WebhookConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for RasConfig {
    fn default() -> Self {
        Self {
            name: "ras-node".to_string(),
            store: StoreConfig::default(),
            voting: VotingConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            webhook: WebhookConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RasConfig {
    pub fn from_json(content: &str) -> Result<Self, RasError> {
        serde_json::from_str(content).map_err(|e| RasError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, RasError> {
        serde_json::to_string_pretty(self).map_err(|e| RasError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), RasError> {
        self.store.validate()?;
        self.voting.validate()?;
        if self.webhook.timeout_ms == 0 {
            return Err(RasError::Config("webhook.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Smallest per-segment budget; a pending record with full notes and a
/// reviewer index with a few dozen summaries must fit in one segment
pub const MIN_SEGMENT_BYTES: usize = 64 * 1024;

/// Ephemeral store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Total byte budget
    pub capacity_bytes: usize,

    /// Number of independently locked segments
    pub segments: usize,

    /// Default entry TTL in seconds
    pub default_ttl_secs: u64,

    /// Interval between expired-entry sweeps in seconds
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024,
            segments: 256,
            default_ttl_secs: 7 * 24 * 3600, // one week
            sweep_interval_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Byte budget of one segment, which is also the largest storable entry
    pub fn segment_capacity(&self) -> usize {
        self.capacity_bytes / self.segments.max(1)
    }

    pub fn validate(&self) -> Result<(), RasError> {
        if self.segments == 0 {
            return Err(RasError::Config("store.segments must be positive".into()));
        }
        if self.segment_capacity() < MIN_SEGMENT_BYTES {
            return Err(RasError::Config(format!(
                "store.capacity_bytes ({}) over {} segments leaves less than {} bytes per segment",
                self.capacity_bytes, self.segments, MIN_SEGMENT_BYTES
            )));
        }
        if self.default_ttl_secs == 0 {
            return Err(RasError::Config("store.default_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Panel and quorum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Reviewers drawn per session
    pub panel_size: usize,

    /// Same-decision count that settles a session early
    pub quorum_threshold: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            panel_size: 10,
            quorum_threshold: 4,
        }
    }
}

impl VotingConfig {
    pub fn validate(&self) -> Result<(), RasError> {
        if self.panel_size == 0 {
            return Err(RasError::Config("voting.panel_size must be positive".into()));
        }
        if self.quorum_threshold == 0 || self.quorum_threshold > self.panel_size {
            return Err(RasError::Config(format!(
                "voting.quorum_threshold must be within 1..={}, got {}",
                self.panel_size, self.quorum_threshold
            )));
        }
        Ok(())
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            enable_cors: true,
        }
    }
}

/// Durable storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sled,
}

/// Durable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Data directory for the sled backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Outcome callback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
