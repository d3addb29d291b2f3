//! Error types for the MQTT client façade

use std::path::PathBuf;

use thiserror::Error;

/// Problems found while building a [`ClientConfig`](super::config::ClientConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A username was given without a password, or the other way round
    #[error("Credentials need both a username and a password")]
    IncompleteCredentials,

    /// The broker address could not be split into host and port
    #[error("Invalid broker address '{0}'")]
    InvalidAddress(String),

    /// Empty client id, or one starting with a space
    #[error("Invalid client id '{0}'")]
    InvalidClientId(String),

    /// QoS outside of 0..=2
    #[error("Invalid QoS level {0}")]
    InvalidQos(u8),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors surfaced by [`KClient`](super::mqtt_handler::KClient) and [`ClientHandle`](super::transport::ClientHandle)
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport could not open the connection or the broker refused it
    #[error("Connect error: {0}")]
    Connect(String),

    /// An operation that needs a live connection was issued before connect or after close
    #[error("Client is not connected")]
    NotConnected,

    /// The subscribe request failed or was rejected in the SUBACK
    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The publish request failed or was never acknowledged
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Disconnect error: {0}")]
    Disconnect(String),
}

impl ClientError {
    /// True for failures reported through a subscribe or publish acknowledgment
    pub fn is_ack_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Subscribe { .. } | ClientError::Publish { .. }
        )
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
