use std::sync::Arc;

use bytes::Bytes;
use rumqttc::{MqttOptions, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{ClientConfig, Credentials, DISCONNECT_GRACE};
use super::dispatcher::Dispatcher;
use super::error::{ClientError, Result};
use super::message_manager::MQTTMessage;
use super::topics::TopicSet;
use super::transport::{ClientHandle, Connector, RumqttcConnector};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Closed,
}

/// A subscribe running on its own task.
///
/// Dropping it leaves the task running (fire-and-forget); [`wait`](Self::wait)
/// yields the acknowledgment result.
#[derive(Debug)]
pub struct PendingSubscription {
    topic: String,
    task: JoinHandle<Result<()>>,
}

impl PendingSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::Subscribe {
                topic: self.topic,
                reason: format!("subscribe task failed: {}", e),
            }),
        }
    }
}

/// Subscriptions started together by [`KClient::subscribe_all`]
#[derive(Debug, Default)]
pub struct SubscriptionBatch {
    pending: Vec<PendingSubscription>,
}

impl SubscriptionBatch {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(PendingSubscription::topic)
    }

    /// Waits for every subscription, returning each topic with its result in
    /// the order they were issued
    pub async fn wait(self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(self.pending.len());
        for pending in self.pending {
            let topic = pending.topic.clone();
            results.push((topic, pending.wait().await));
        }
        results
    }
}

/// MQTT client façade: topic bookkeeping, per-topic handler dispatch and
/// pass-through connect / subscribe / publish / close.
///
/// Handlers can be registered before or after [`connect`](Self::connect); the
/// handler table is shared with the event loop behind a lock.
pub struct KClient {
    config: ClientConfig,
    options: MqttOptions,
    topics: TopicSet,
    dispatcher: Arc<Dispatcher>,
    connector: Arc<dyn Connector>,
    handle: Option<ClientHandle>,
    state: ConnectionState,
}

impl KClient {
    /// Creates an unconnected client for `address` (`host` or `host:port`)
    pub fn new(
        address: &str,
        client_id: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let config = ClientConfig::new(address, client_id, credentials)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        let options = config.to_mqtt_options();
        debug!(
            "Created client '{}' for broker {}",
            config.client_id, config.address
        );

        KClient {
            config,
            options,
            topics: TopicSet::new(),
            dispatcher: Arc::new(Dispatcher::new()),
            connector: Arc::new(RumqttcConnector),
            handle: None,
            state: ConnectionState::default(),
        }
    }

    /// Replaces the connector used by [`connect`](Self::connect)
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Handle of the live connection, if any
    pub fn handle(&self) -> Option<&ClientHandle> {
        self.handle.as_ref()
    }

    pub fn topics(&self) -> &[String] {
        self.topics.as_slice()
    }

    pub fn add_topics<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics);
    }

    pub fn delete_topics<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.topics.remove_all(topics);
    }

    /// Forgets every topic. Subscriptions already made on the broker stay.
    pub fn clear_topics(&mut self) {
        self.topics.clear();
    }

    /// Registers the handler for messages on exactly `topic`, replacing any previous one
    pub fn on_message<F>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(&ClientHandle, &MQTTMessage) + Send + Sync + 'static,
    {
        let topic = topic.into();
        if self.dispatcher.set_handler(topic.clone(), Arc::new(handler)).is_some() {
            debug!("Replaced handler for '{}'", topic);
        }
    }

    /// Returns whether a handler was registered for `topic`
    pub fn remove_handler(&self, topic: &str) -> bool {
        self.dispatcher.remove_handler(topic).is_some()
    }

    /// Handler for messages whose topic has no handler of its own
    pub fn except_message<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle, &MQTTMessage) + Send + Sync + 'static,
    {
        self.dispatcher.set_fallback(Arc::new(handler));
    }

    /// Handler run for every message, after the topic or fallback handler
    pub fn all_message<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle, &MQTTMessage) + Send + Sync + 'static,
    {
        self.dispatcher.set_catch_all(Arc::new(handler));
    }

    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle) + Send + Sync + 'static,
    {
        self.dispatcher.set_on_connect(Arc::new(handler));
    }

    pub fn on_connection_lost<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle, &str) + Send + Sync + 'static,
    {
        self.dispatcher.set_on_connection_lost(Arc::new(handler));
    }

    /// Mutates the underlying `rumqttc` options; takes effect on the next connect
    pub fn set_options<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut MqttOptions),
    {
        mutate(&mut self.options);
    }

    /// Opens the connection and waits for the broker to accept it
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(previous) = self.handle.take() {
            warn!("Connect called on a connected client, dropping the old connection");
            previous.shutdown();
            self.state = ConnectionState::Disconnected;
        }

        let handle = self
            .connector
            .connect(
                self.options.clone(),
                &self.config.settings,
                self.dispatcher.clone(),
            )
            .await?;
        self.handle = Some(handle);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn live_handle(&self) -> Result<&ClientHandle> {
        self.handle.as_ref().ok_or(ClientError::NotConnected)
    }

    /// Subscribes to `topic` on its own task; the caller is not blocked
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the subscribe runs
    /// on a spawned task.
    pub fn subscribe(&self, topic: impl Into<String>, qos: QoS) -> Result<PendingSubscription> {
        let handle = self.live_handle()?.clone();
        Ok(spawn_subscribe(handle, topic.into(), qos))
    }

    /// Subscribes to every known topic, one task per topic
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the subscribe runs
    /// on a spawned task.
    pub fn subscribe_all(&self, qos: QoS) -> Result<SubscriptionBatch> {
        let handle = self.live_handle()?;
        let pending = self
            .topics
            .iter()
            .map(|topic| spawn_subscribe(handle.clone(), topic.clone(), qos))
            .collect();
        Ok(SubscriptionBatch { pending })
    }

    /// Adds `topic` to the topic list and subscribes to it.
    ///
    /// The topic is kept in the list even when the subscribe cannot be issued.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the subscribe runs
    /// on a spawned task.
    pub fn add_and_subscribe(
        &mut self,
        topic: impl Into<String>,
        qos: QoS,
    ) -> Result<PendingSubscription> {
        let topic = topic.into();
        self.topics.add(topic.clone());
        self.subscribe(topic, qos)
    }

    /// Publishes `payload` to each topic in turn, waiting for each
    /// acknowledgment before moving to the next topic
    pub async fn publish<I, S>(&self, payload: impl Into<Bytes>, qos: QoS, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handle = self.live_handle()?;
        let payload = payload.into();
        for topic in topics {
            handle
                .publish(topic.as_ref(), qos, false, payload.clone())
                .await?;
        }
        Ok(())
    }

    /// Disconnects, giving in-flight acknowledgments a short grace period
    pub async fn close(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or(ClientError::NotConnected)?;
        self.state = ConnectionState::Closed;
        info!("Closing connection for client '{}'", self.config.client_id);
        handle.disconnect(DISCONNECT_GRACE).await
    }
}

impl Drop for KClient {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

fn spawn_subscribe(handle: ClientHandle, topic: String, qos: QoS) -> PendingSubscription {
    let task_topic = topic.clone();
    let task = tokio::spawn(async move {
        let result = handle.subscribe(&task_topic, qos).await;
        match &result {
            Ok(()) => debug!("Subscribed to '{}'", task_topic),
            Err(e) => warn!("{}", e),
        }
        result
    });
    PendingSubscription { topic, task }
}
