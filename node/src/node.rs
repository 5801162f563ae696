//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use crate::seed::SeedConfig;
use ras_core::{RasConfig, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// RAS node serving the voting API
pub struct RasNode {
    runtime: Arc<NodeRuntime>,
}

impl RasNode {
    /// Create a node and load its seed data
    pub fn new(config: RasConfig, seed: SeedConfig) -> anyhow::Result<Self> {
        let runtime = NodeRuntime::new(config)?;
        runtime.apply_seed(&seed)?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    /// Start the node and block until ctrl-c
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting RAS node {}...", self.runtime.config().name);

        let background = self.runtime.spawn_background();

        let api_runtime = self.runtime.clone();
        let api_addr = self.runtime.config().api.listen_addr.clone();
        let api_handle = tokio::spawn(async move {
            if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                error!("API server error: {}", e);
            }
        });

        info!("Node started successfully");

        // Wait for shutdown signal
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        api_handle.abort();
        for handle in background {
            handle.abort();
        }

        info!("Node stopped");

        Ok(())
    }

    /// Get runtime reference
    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: RasConfig,
    seed: SeedConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: RasConfig::default(),
            seed: SeedConfig::default(),
        }
    }

    pub fn config(mut self, config: RasConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(mut self, seed: SeedConfig) -> Self {
        self.seed = seed;
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.data_dir = dir;
        self
    }

    /// Persist sessions and votes with sled
    pub fn sled(mut self) -> Self {
        self.config.storage.backend = StorageBackend::Sled;
        self
    }

    pub fn build(self) -> anyhow::Result<RasNode> {
        RasNode::new(self.config, self.seed)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
