use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rumqttc::{MqttOptions, QoS};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Port used when the broker address does not name one
pub const DEFAULT_PORT: u16 = 1883;

/// How long `close` waits for in-flight acknowledgments before disconnecting
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Username and password for the broker, always supplied together
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds credentials from two optional halves.
    ///
    /// Both present gives `Some`, both absent gives `None`, anything else is
    /// [`ConfigError::IncompleteCredentials`].
    pub fn from_optional(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        match (username, password) {
            (Some(username), Some(password)) => Ok(Some(Self::new(username, password))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteCredentials),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What to do when a subscribe or publish acknowledgment reports a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Return the failure to the caller
    #[default]
    Report,
    /// Log the failure and report success (fire-and-forget)
    Ignore,
}

/// Broker host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for BrokerAddress {
    type Err = ConfigError;

    /// Accepts `host`, `host:port`, `[v6]:port`, optionally prefixed with
    /// `tcp://` or `mqtt://`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());
        let trimmed = s.trim();
        let rest = trimmed
            .strip_prefix("tcp://")
            .or_else(|| trimmed.strip_prefix("mqtt://"))
            .unwrap_or(trimmed);

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                tail => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else if rest.matches(':').count() > 1 {
            // bare IPv6 literal
            (rest, None)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Transport tuning that is not part of the broker identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub keep_alive: Duration,
    /// Capacity of the request channel between the client and its event loop
    pub request_capacity: usize,
    /// Pause before the event loop is polled again after a connection error
    pub reconnect_delay: Duration,
    pub ack_policy: AckPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(5),
            request_capacity: 100,
            reconnect_delay: Duration::from_secs(1),
            ack_policy: AckPolicy::Report,
        }
    }
}

/// Everything needed to reach a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: BrokerAddress,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub settings: ClientSettings,
}

impl ClientConfig {
    pub fn new(
        address: &str,
        client_id: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id.into();
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(ConfigError::InvalidClientId(client_id));
        }
        Ok(Self {
            address: address.parse()?,
            client_id,
            credentials,
            settings: ClientSettings::default(),
        })
    }

    /// Like [`ClientConfig::new`], but takes the credential halves separately
    /// and rejects a lone username or password.
    pub fn from_parts(
        address: &str,
        client_id: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let credentials = Credentials::from_optional(username, password)?;
        Self::new(address, client_id, credentials)
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the `rumqttc` options this configuration describes
    pub fn to_mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.address.host(),
            self.address.port(),
        );
        options.set_keep_alive(self.settings.keep_alive);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(credentials.username(), credentials.password());
        }
        options
    }
}

/// Maps a numeric level to [`QoS`]
pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidQos(other)),
    }
}
