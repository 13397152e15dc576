use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use murmur_crypto::sealing::DEFAULT_KDF_ITERATIONS;
use murmur_relay::config::RelayConfig;

use crate::error::NodeError;

/// File name written by `murmur init`.
pub const CONFIG_FILE: &str = "murmur.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub mesh: MeshConfig,
    pub rendezvous: RendezvousConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Label the key blob is stored under.
    pub account: String,
    pub data_dir: String,
    /// PBKDF2 iterations for newly wrapped keys.
    pub kdf_iterations: u32,
    /// Storage backend: "memory" or "sqlite".
    pub storage: String,
}

/// Overlay and gossip tuning. Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub nickname: String,
    pub max_degree: usize,
    pub min_degree: usize,
    pub creation_burst_limit: usize,
    pub proposal_ttl: u32,
    pub proposal_lifetime_ms: u64,
    pub formation_interval_ms: u64,
    pub pull_interval_ms: u64,
    pub pull_retry_ms: u64,
    pub max_tracked_ids: usize,
    pub call_lifetime_ms: u64,
    pub feed_interval_ms: u64,
    pub rendezvous_linger_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousConfig {
    pub room: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl Default for MeshConfig {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            nickname: relay.nickname,
            max_degree: relay.max_degree,
            min_degree: relay.min_degree,
            creation_burst_limit: relay.creation_burst_limit,
            proposal_ttl: relay.proposal_ttl,
            proposal_lifetime_ms: millis(relay.proposal_lifetime),
            formation_interval_ms: millis(relay.formation_interval),
            pull_interval_ms: millis(relay.pull_interval),
            pull_retry_ms: millis(relay.pull_retry),
            max_tracked_ids: relay.max_tracked_ids,
            call_lifetime_ms: millis(relay.call_lifetime),
            feed_interval_ms: millis(relay.feed_interval),
            rendezvous_linger_ms: millis(relay.rendezvous_linger),
        }
    }
}

impl MeshConfig {
    pub fn to_relay_config(&self) -> RelayConfig {
        RelayConfig {
            nickname: self.nickname.clone(),
            max_degree: self.max_degree,
            min_degree: self.min_degree,
            creation_burst_limit: self.creation_burst_limit,
            proposal_ttl: self.proposal_ttl,
            proposal_lifetime: Duration::from_millis(self.proposal_lifetime_ms),
            formation_interval: Duration::from_millis(self.formation_interval_ms),
            formation_enabled: true,
            pull_interval: Duration::from_millis(self.pull_interval_ms),
            pull_retry: Duration::from_millis(self.pull_retry_ms),
            max_tracked_ids: self.max_tracked_ids,
            call_lifetime: Duration::from_millis(self.call_lifetime_ms),
            feed_interval: Duration::from_millis(self.feed_interval_ms),
            rendezvous_linger: Duration::from_millis(self.rendezvous_linger_ms),
            rng_seed: None,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig {
                account: "default".to_string(),
                data_dir: dirs::home_dir()
                    .map(|h| h.join(".murmur").to_string_lossy().into_owned())
                    .unwrap_or_else(|| "./murmur-data".to_string()),
                kdf_iterations: DEFAULT_KDF_ITERATIONS,
                storage: "sqlite".to_string(),
            },
            mesh: MeshConfig::default(),
            rendezvous: RendezvousConfig {
                room: "lobby".to_string(),
                servers: vec!["wss://rendezvous.murmur.chat".to_string()],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &str) -> Result<Self, NodeError> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write a default configuration file into `dir`.
    pub fn init(dir: &str) -> Result<PathBuf, NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        let config_path = dir_path.join(CONFIG_FILE);
        std::fs::write(&config_path, toml_str)?;
        Ok(config_path)
    }

    /// SQLite database holding keys and contacts.
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.identity.data_dir).join("murmur.db")
    }
}
