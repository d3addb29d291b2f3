//! On-disk client configuration
//!
//! ```toml
//! address = "broker.local:1883"
//! client_id = "kitchen-panel"
//! username = "panel"
//! password = "secret"
//! keep_alive_secs = 5
//! ack_policy = "report"
//! topics = ["home/kitchen/#", "home/alarm"]
//! qos = 1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mqtt::config::{qos_from_level, AckPolicy, ClientConfig, ClientSettings};
use crate::mqtt::error::ConfigError;

const CONFIG_DIR: &str = "kmqtt";
const CONFIG_FILE: &str = "client.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub address: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub request_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub ack_policy: AckPolicy,
    pub topics: Vec<String>,
    pub qos: u8,
}

impl Default for FileConfig {
    fn default() -> Self {
        let settings = ClientSettings::default();
        Self {
            address: "localhost".to_string(),
            client_id: "kmqtt".to_string(),
            username: None,
            password: None,
            keep_alive_secs: settings.keep_alive.as_secs(),
            request_capacity: settings.request_capacity,
            reconnect_delay_ms: settings.reconnect_delay.as_millis() as u64,
            ack_policy: settings.ack_policy,
            topics: Vec::new(),
            qos: 0,
        }
    }
}

impl FileConfig {
    /// `<config dir>/kmqtt/client.toml`, falling back to the working directory
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded client config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            request_capacity: self.request_capacity.max(1),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ack_policy: self.ack_policy,
        }
    }

    /// Validates address and credentials and builds the runtime configuration
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let config = ClientConfig::from_parts(
            &self.address,
            self.client_id.clone(),
            self.username.clone(),
            self.password.clone(),
        )?;
        Ok(config.with_settings(self.settings()))
    }

    pub fn qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.qos)
    }
}
