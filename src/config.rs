// Node configuration, loaded from a TOML file

use crate::identity::{KeyError, KeyPair, PublicKey};
use crate::sync::DirectoryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid key in config: {0}")]
    Key(#[from] KeyError),

    #[error("No keys configured")]
    NoKeys,

    #[error("poll_interval_ms must be greater than zero")]
    InvalidPollInterval,
}

/// A key pair as written in the config file (base64)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyConfig {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// URL other nodes use to reach this node
    pub server_url: String,
    pub bind_address: SocketAddr,
    pub peers: Vec<String>,
    pub disable_peer_discovery: bool,
    pub enable_enhanced_privacy: bool,
    pub storage_path: PathBuf,
    /// Managed keys; the first one is the default sender
    pub keys: Vec<KeyConfig>,
    /// Keys copied on every outbound transaction
    pub always_send_to: Vec<String>,
    pub poll_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:9001/".to_string(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9001)),
            peers: Vec::new(),
            disable_peer_discovery: false,
            enable_enhanced_privacy: false,
            storage_path: PathBuf::from("privmesh-data"),
            keys: Vec::new(),
            always_send_to: Vec::new(),
            poll_interval_ms: 2000,
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(config)
    }

    /// Decode and pair up the configured keys
    pub fn key_pairs(&self) -> Result<Vec<KeyPair>, ConfigError> {
        if self.keys.is_empty() {
            return Err(ConfigError::NoKeys);
        }
        self.keys
            .iter()
            .map(|k| KeyPair::from_base64(&k.public_key, &k.private_key).map_err(ConfigError::from))
            .collect()
    }

    pub fn forwarding_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.always_send_to
            .iter()
            .map(|k| PublicKey::from_base64(k).map_err(ConfigError::from))
            .collect()
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig::new(&self.server_url)
            .with_peers(&self.peers)
            .with_peer_discovery_disabled(self.disable_peer_discovery)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
