use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::NaiveDateTime;
use rumqttc::{Publish, QoS};

const PREVIEW_CHARS: usize = 10;

/// An inbound message as seen by registered handlers
#[derive(Clone, Debug, PartialEq)]
pub struct MQTTMessage {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    duplicate: bool,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = self.payload_str();
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();
        write!(f, "{} - {} - {}", self.timestamp, self.topic, preview)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        MQTTMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            duplicate: false,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload decoded as UTF-8, invalid sequences replaced
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn duplicate(&self) -> bool {
        self.duplicate
    }

    /// Local time the message was handed to the dispatcher
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn render(&self) -> String {
        format!("{}: {}\n{}", self.timestamp, self.topic, self.payload_str())
    }
}

impl From<Publish> for MQTTMessage {
    fn from(publish: Publish) -> Self {
        MQTTMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
            duplicate: publish.dup,
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}
