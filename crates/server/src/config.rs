use std::path::Path;

use anyhow::{Context, Result};
use relay::{DEFAULT_PORT, PlayerConfig, ReplicationConfig, UdpConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_clients: usize,
    /// Loose dynamic props spawned into the testing ground.
    pub props: usize,
    pub replication: ReplicationConfig,
    pub udp: UdpConfig,
    pub player: PlayerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: 32,
            props: 50,
            replication: ReplicationConfig::default(),
            udp: UdpConfig::default(),
            player: PlayerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
