use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub link: LinkConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Mock {
        /// Number of simulated devices
        device_count: u32,
        /// Milliseconds between two samples of a simulated device
        sample_interval_ms: u32,
        /// Probability in `0.0..=1.0` that a simulated frame is lost
        #[serde(default)]
        drop_rate: f64,
    },
    Tcp {
        addr: SocketAddr,
    },
    Udp {
        addr: SocketAddr,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Missing samples that move a link to degraded
    pub gap_threshold: u32,
    pub liveness_timeout_secs: u64,
    /// Milliseconds between two liveness sweeps
    pub sweep_interval_ms: u64,
}

impl SessionSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            gap_threshold: self.gap_threshold.max(1),
            liveness_timeout: Duration::from_secs(self.liveness_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();

        Self {
            gap_threshold: session.gap_threshold,
            liveness_timeout_secs: session.liveness_timeout.as_secs(),
            sweep_interval_ms: 500,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            },
            storage: StorageConfig::Memory,
            link: LinkConfig::Mock {
                device_count: 3,
                sample_interval_ms: 1000,
                drop_rate: 0.02,
            },
            session: SessionSettings::default(),
        }
    }
}
