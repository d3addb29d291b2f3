//! In-memory stand-in for a broker connection

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kmqtt::mqtt::config::ClientSettings;
use kmqtt::mqtt::dispatcher::{Delivery, Dispatcher};
use kmqtt::mqtt::error::{ClientError, Result};
use kmqtt::mqtt::{ClientHandle, Connector, MQTTMessage, Transport};
use kmqtt::{MqttOptions, QoS};
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Subscribe(String, QoS),
    Publish(String, QoS, bool, Bytes),
    Disconnect(Duration),
}

#[derive(Default)]
pub struct Broker {
    pub calls: Mutex<Vec<Call>>,
    pub options: Mutex<Option<MqttOptions>>,
    pub rejected_topics: Mutex<HashSet<String>>,
    pub held_topics: Mutex<HashMap<String, Arc<Notify>>>,
    pub refuse_connect: Mutex<Option<String>>,
    pub shutdowns: Mutex<usize>,
    session: Mutex<Option<(Arc<Dispatcher>, ClientHandle)>>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reject(&self, topic: &str) {
        self.rejected_topics.lock().insert(topic.to_string());
    }

    /// Subscribes to `topic` stay pending until the returned notify fires
    pub fn hold(&self, topic: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.held_topics
            .lock()
            .insert(topic.to_string(), notify.clone());
        notify
    }

    /// Delivers an inbound message as the event loop would
    pub fn deliver(&self, topic: &str, payload: &str) -> Delivery {
        let (dispatcher, handle) = self
            .session
            .lock()
            .clone()
            .expect("deliver called before connect");
        dispatcher.dispatch(&handle, &MQTTMessage::from_topic(topic, payload.to_string()))
    }

    pub fn lose_connection(&self, reason: &str) {
        let (dispatcher, handle) = self.session.lock().clone().expect("not connected");
        dispatcher.connection_lost(&handle, reason);
    }
}

pub struct FakeTransport {
    broker: Arc<Broker>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        self.broker
            .calls
            .lock()
            .push(Call::Subscribe(topic.to_string(), qos));

        let held = self.broker.held_topics.lock().get(topic).cloned();
        if let Some(notify) = held {
            notify.notified().await;
        }

        if self.broker.rejected_topics.lock().contains(topic) {
            return Err(ClientError::Subscribe {
                topic: topic.to_string(),
                reason: "broker rejected the subscription".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        self.broker
            .calls
            .lock()
            .push(Call::Publish(topic.to_string(), qos, retain, payload));
        if self.broker.rejected_topics.lock().contains(topic) {
            return Err(ClientError::Publish {
                topic: topic.to_string(),
                reason: "not acknowledged".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        self.broker.calls.lock().push(Call::Disconnect(grace));
        Ok(())
    }

    fn shutdown(&self) {
        *self.broker.shutdowns.lock() += 1;
    }
}

pub struct FakeConnector {
    pub broker: Arc<Broker>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        options: MqttOptions,
        settings: &ClientSettings,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<ClientHandle> {
        *self.broker.options.lock() = Some(options);
        let refusal = self.broker.refuse_connect.lock().clone();
        if let Some(reason) = refusal {
            return Err(ClientError::Connect(reason));
        }

        let transport = Arc::new(FakeTransport {
            broker: self.broker.clone(),
        });
        let handle = ClientHandle::new(transport, settings.ack_policy);
        *self.broker.session.lock() = Some((dispatcher.clone(), handle.clone()));
        dispatcher.connected(&handle);
        Ok(handle)
    }
}
