//! Configuration for an sdnet controller node
//!
//! Structured configuration with sensible defaults, TOML loading,
//! `SDNET_*` environment overrides and runtime validation.

use crate::error::{SdnError, SdnResult};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod defaults;
pub mod events;
pub mod logging;
pub mod mastership;
pub mod meters;
pub mod routes;
pub mod storage;
pub mod topology;

pub use defaults::*;
pub use events::{EventConfig, OverflowPolicy};
pub use logging::{LogFormat, LoggingConfig};
pub use mastership::MastershipConfig;
pub use meters::MeterConfig;
pub use routes::RouteConfig;
pub use storage::StorageConfig;
pub use topology::TopologyConfig;

/// Root configuration structure for an sdnet node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdnConfig {
    /// Identifier of the local controller node
    pub node_id: String,

    /// Cluster name
    pub cluster_name: String,

    pub mastership: MastershipConfig,

    pub topology: TopologyConfig,

    pub events: EventConfig,

    pub routes: RouteConfig,

    pub meters: MeterConfig,

    pub storage: StorageConfig,

    pub logging: LoggingConfig,
}

impl Default for SdnConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            cluster_name: "default".to_string(),
            mastership: MastershipConfig::default(),
            topology: TopologyConfig::default(),
            events: EventConfig::default(),
            routes: RouteConfig::default(),
            meters: MeterConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SdnConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document and validate the result
    pub fn from_toml_str(raw: &str) -> SdnResult<Self> {
        let mut config: SdnConfig = toml::from_str(raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SdnResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> SdnResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> SdnResult<()> {
        if let Ok(id) = std::env::var("SDNET_NODE_ID") {
            self.node_id = id;
        }

        if let Ok(name) = std::env::var("SDNET_CLUSTER_NAME") {
            self.cluster_name = name;
        }

        if let Ok(filter) = std::env::var("SDNET_LOG_FILTER") {
            self.logging.filter = filter;
        }

        self.mastership.apply_env_overrides()?;
        self.storage.apply_env_overrides();
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> SdnResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(SdnError::configuration("node_id", "must not be empty"));
        }

        self.mastership.validate()?;
        self.topology.validate()?;
        self.events.validate()?;
        self.routes.validate()?;
        self.meters.validate()?;
        self.storage.validate()?;

        Ok(())
    }

    pub fn local_node(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    /// Create a test configuration with minimal settings
    pub fn test(node_id: &str) -> Self {
        let mut config = Self::default();
        config.node_id = node_id.to_string();
        config.cluster_name = "test".to_string();
        config
    }
}

/// Builder for SdnConfig
pub struct SdnConfigBuilder {
    config: SdnConfig,
}

impl SdnConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SdnConfig::default(),
        }
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    pub fn mastership(mut self, mastership: MastershipConfig) -> Self {
        self.config.mastership = mastership;
        self
    }

    pub fn topology(mut self, topology: TopologyConfig) -> Self {
        self.config.topology = topology;
        self
    }

    pub fn events(mut self, events: EventConfig) -> Self {
        self.config.events = events;
        self
    }

    pub fn routes(mut self, routes: RouteConfig) -> Self {
        self.config.routes = routes;
        self
    }

    pub fn meters(mut self, meters: MeterConfig) -> Self {
        self.config.meters = meters;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn build(self) -> SdnResult<SdnConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SdnConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_duration_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
