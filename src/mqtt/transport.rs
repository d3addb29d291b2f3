//! Seam between the façade and the MQTT client library
//!
//! [`Connector`] opens a connection and yields a [`ClientHandle`]; the handle
//! wraps a [`Transport`] that performs subscribe / publish / disconnect and
//! resolves each call once the broker acknowledges it. [`RumqttcConnector`] is
//! the production implementation on top of `rumqttc`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{AckPolicy, ClientSettings};
use super::dispatcher::Dispatcher;
use super::error::{ClientError, Result};
use super::message_manager::MQTTMessage;

/// Interval at which `disconnect` re-checks for outstanding acknowledgments
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Operations the façade needs from a live connection.
///
/// `subscribe` and `publish` resolve only after the broker acknowledged the
/// request (QoS 0 publishes once the packet has been handed to the network).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()>;

    /// Waits up to `grace` for in-flight acknowledgments, then disconnects.
    /// The whole call, including stopping the connection, stays within `grace`.
    async fn disconnect(&self, grace: Duration) -> Result<()>;

    /// Stops background work without talking to the broker
    fn shutdown(&self);
}

/// Opens connections for [`KClient`](super::mqtt_handler::KClient)
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects with `options` and returns once the broker accepted the
    /// session. Inbound messages and lifecycle events go to `dispatcher`.
    async fn connect(
        &self,
        options: MqttOptions,
        settings: &ClientSettings,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<ClientHandle>;
}

/// Cheap, cloneable handle to an open connection.
///
/// Passed to every handler so it can publish or subscribe in response to a
/// message. Methods apply the configured [`AckPolicy`].
#[derive(Clone)]
pub struct ClientHandle {
    transport: Arc<dyn Transport>,
    ack_policy: AckPolicy,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("ack_policy", &self.ack_policy)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    pub fn new(transport: Arc<dyn Transport>, ack_policy: AckPolicy) -> Self {
        Self {
            transport,
            ack_policy,
        }
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let result = self.transport.subscribe(topic, qos).await;
        self.settle(result)
    }

    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let result = self
            .transport
            .publish(topic, qos, retain, payload.into())
            .await;
        self.settle(result)
    }

    pub async fn disconnect(&self, grace: Duration) -> Result<()> {
        self.transport.disconnect(grace).await
    }

    pub(crate) fn shutdown(&self) {
        self.transport.shutdown();
    }

    fn settle(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_ack_failure() && self.ack_policy == AckPolicy::Ignore => {
                warn!("Ignoring acknowledgment failure: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}

type AckResult = std::result::Result<(), String>;
type AckSender = oneshot::Sender<AckResult>;

/// Correlates requests with the acknowledgments `rumqttc` reports.
///
/// Requests leave the client channel in order, so waiters are queued in
/// request order and bound to a packet id when the event loop reports the
/// matching outgoing packet.
#[derive(Default)]
struct AckTracker {
    queued_subscribes: VecDeque<AckSender>,
    queued_publishes: VecDeque<(QoS, AckSender)>,
    subscribes: HashMap<u16, AckSender>,
    publishes: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn outgoing_subscribe(&mut self, pkid: u16) {
        if self.subscribes.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.queued_subscribes.pop_front() {
            self.subscribes.insert(pkid, waiter);
        }
    }

    fn outgoing_publish(&mut self, pkid: u16) {
        // a pkid already being tracked is a retransmission
        if pkid != 0 && self.publishes.contains_key(&pkid) {
            return;
        }
        let Some((qos, waiter)) = self.queued_publishes.pop_front() else {
            return;
        };
        if qos == QoS::AtMostOnce {
            let _ = waiter.send(Ok(()));
        } else {
            self.publishes.insert(pkid, waiter);
        }
    }

    fn suback(&mut self, ack: &SubAck) {
        let Some(waiter) = self.subscribes.remove(&ack.pkid) else {
            debug!("SUBACK for unknown packet id {}", ack.pkid);
            return;
        };
        let rejected = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let result = if rejected {
            Err("broker rejected the subscription".to_string())
        } else {
            Ok(())
        };
        let _ = waiter.send(result);
    }

    fn publish_complete(&mut self, pkid: u16) {
        if let Some(waiter) = self.publishes.remove(&pkid) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn is_idle(&self) -> bool {
        self.queued_subscribes.is_empty()
            && self.queued_publishes.is_empty()
            && self.subscribes.is_empty()
            && self.publishes.is_empty()
    }

    fn fail_all(&mut self, reason: &str) {
        let waiters = self
            .queued_subscribes
            .drain(..)
            .chain(self.queued_publishes.drain(..).map(|(_, waiter)| waiter))
            .chain(self.subscribes.drain().map(|(_, waiter)| waiter))
            .chain(self.publishes.drain().map(|(_, waiter)| waiter));
        for waiter in waiters {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

/// [`Transport`] backed by a `rumqttc` [`AsyncClient`]
pub struct RumqttcTransport {
    client: AsyncClient,
    acks: Arc<Mutex<AckTracker>>,
    // keeps "queue waiter, enqueue request" atomic across concurrent callers
    request_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcTransport {
    async fn await_ack(receiver: oneshot::Receiver<AckResult>) -> AckResult {
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err("connection closed before acknowledgment".to_string()),
        }
    }
}

#[async_trait]
impl Transport for RumqttcTransport {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let _guard = self.request_lock.lock().await;
            self.acks.lock().queued_subscribes.push_back(tx);
            if let Err(e) = self.client.subscribe(topic, qos).await {
                self.acks.lock().queued_subscribes.pop_back();
                return Err(ClientError::Subscribe {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        debug!("Subscribe request for '{}' queued", topic);

        Self::await_ack(rx)
            .await
            .map_err(|reason| ClientError::Subscribe {
                topic: topic.to_string(),
                reason,
            })
    }

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let _guard = self.request_lock.lock().await;
            self.acks.lock().queued_publishes.push_back((qos, tx));
            if let Err(e) = self.client.publish_bytes(topic, qos, retain, payload).await {
                self.acks.lock().queued_publishes.pop_back();
                return Err(ClientError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Self::await_ack(rx)
            .await
            .map_err(|reason| ClientError::Publish {
                topic: topic.to_string(),
                reason,
            })
    }

    async fn disconnect(&self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;
        loop {
            let idle = self.acks.lock().is_idle();
            if idle {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Disconnecting with acknowledgments still outstanding");
                break;
            }
            sleep(DRAIN_POLL).await;
        }

        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| ClientError::Disconnect(e.to_string()));

        let task = self.event_loop.lock().take();
        if let Some(task) = task {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, task).await.is_err() {
                debug!("Event loop did not stop within the grace period");
            }
        }
        self.shutdown();
        result
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Opens connections with `rumqttc`
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcConnector;

#[async_trait]
impl Connector for RumqttcConnector {
    async fn connect(
        &self,
        options: MqttOptions,
        settings: &ClientSettings,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<ClientHandle> {
        let (host, port) = options.broker_address();
        info!("Connecting to MQTT broker at {}:{}", host, port);

        let (client, event_loop) = AsyncClient::new(options, settings.request_capacity);
        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let cancel = CancellationToken::new();
        let transport = Arc::new(RumqttcTransport {
            client,
            acks: acks.clone(),
            request_lock: tokio::sync::Mutex::new(()),
            cancel: cancel.clone(),
            event_loop: Mutex::new(None),
        });
        let handle = ClientHandle::new(transport.clone(), settings.ack_policy);

        let (connected_tx, connected_rx) = oneshot::channel();
        let driver = EventLoopDriver {
            event_loop,
            client: handle.clone(),
            acks,
            dispatcher,
            cancel,
            reconnect_delay: settings.reconnect_delay,
            connected: Some(connected_tx),
        };
        *transport.event_loop.lock() = Some(tokio::spawn(driver.run()));

        match connected_rx.await {
            Ok(Ok(())) => {
                info!("Connected to MQTT broker at {}:{}", host, port);
                Ok(handle)
            }
            Ok(Err(reason)) => {
                transport.shutdown();
                Err(ClientError::Connect(reason))
            }
            Err(_) => {
                transport.shutdown();
                Err(ClientError::Connect(
                    "event loop stopped before the broker answered".to_string(),
                ))
            }
        }
    }
}

struct EventLoopDriver {
    event_loop: EventLoop,
    client: ClientHandle,
    acks: Arc<Mutex<AckTracker>>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
    connected: Option<oneshot::Sender<AckResult>>,
}

impl EventLoopDriver {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        if let Some(connected) = self.connected.take() {
                            let _ = connected.send(Ok(()));
                        } else {
                            info!("Reconnected to MQTT broker");
                        }
                        self.dispatcher.connected(&self.client);
                    } else if let Some(connected) = self.connected.take() {
                        let _ = connected.send(Err(format!("connection refused: {:?}", ack.code)));
                        break;
                    } else {
                        warn!("Reconnect refused: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = MQTTMessage::from(publish);
                    self.dispatcher.dispatch(&self.client, &message);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    self.acks.lock().suback(&ack);
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.acks.lock().publish_complete(ack.pkid);
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.acks.lock().publish_complete(comp.pkid);
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    self.acks.lock().outgoing_subscribe(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.acks.lock().outgoing_publish(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnect sent, stopping event loop");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let reason = e.to_string();
                    if let Some(connected) = self.connected.take() {
                        let _ = connected.send(Err(reason));
                        break;
                    }
                    error!("MQTT connection error: {}", reason);
                    self.dispatcher.connection_lost(&self.client, &reason);

                    // rumqttc reconnects on the next poll
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        self.acks.lock().fail_all("event loop stopped");
        debug!("MQTT event loop stopped");
    }
}

/// Transport that accepts every request; lets handler tests build a [`ClientHandle`]
#[cfg(test)]
pub(crate) struct NullTransport;

#[cfg(test)]
#[async_trait]
impl Transport for NullTransport {
    async fn subscribe(&self, _topic: &str, _qos: QoS) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _topic: &str, _qos: QoS, _retain: bool, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> (AckSender, oneshot::Receiver<AckResult>) {
        oneshot::channel()
    }

    #[test]
    fn test_subscribes_resolve_in_request_order() {
        let mut acks = AckTracker::default();
        let (first_tx, mut first_rx) = waiter();
        let (second_tx, mut second_rx) = waiter();
        acks.queued_subscribes.push_back(first_tx);
        acks.queued_subscribes.push_back(second_tx);

        acks.outgoing_subscribe(7);
        acks.outgoing_subscribe(8);
        acks.suback(&SubAck::new(8, vec![SubscribeReasonCode::Failure]));
        acks.suback(&SubAck::new(
            7,
            vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        ));

        assert_eq!(first_rx.try_recv().unwrap(), Ok(()));
        assert!(second_rx.try_recv().unwrap().is_err());
        assert!(acks.is_idle());
    }

    #[test]
    fn test_qos0_publish_resolves_when_sent() {
        let mut acks = AckTracker::default();
        let (tx, mut rx) = waiter();
        acks.queued_publishes.push_back((QoS::AtMostOnce, tx));

        acks.outgoing_publish(0);

        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert!(acks.is_idle());
    }

    #[test]
    fn test_qos1_publish_waits_for_puback() {
        let mut acks = AckTracker::default();
        let (tx, mut rx) = waiter();
        acks.queued_publishes.push_back((QoS::AtLeastOnce, tx));

        acks.outgoing_publish(3);
        assert!(rx.try_recv().is_err());
        assert!(!acks.is_idle());

        acks.publish_complete(3);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_retransmission_does_not_consume_queued_waiter() {
        let mut acks = AckTracker::default();
        let (first_tx, _first_rx) = waiter();
        let (second_tx, mut second_rx) = waiter();
        acks.queued_publishes.push_back((QoS::ExactlyOnce, first_tx));
        acks.outgoing_publish(1);
        acks.queued_publishes.push_back((QoS::ExactlyOnce, second_tx));

        // pkid 1 sent again after a reconnect
        acks.outgoing_publish(1);
        assert_eq!(acks.queued_publishes.len(), 1);

        acks.outgoing_publish(2);
        acks.publish_complete(2);
        assert_eq!(second_rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_fail_all_rejects_every_waiter() {
        let mut acks = AckTracker::default();
        let (queued_tx, mut queued_rx) = waiter();
        let (bound_tx, mut bound_rx) = waiter();
        acks.queued_subscribes.push_back(queued_tx);
        acks.publishes.insert(4, bound_tx);

        acks.fail_all("gone");

        assert_eq!(queued_rx.try_recv().unwrap(), Err("gone".to_string()));
        assert_eq!(bound_rx.try_recv().unwrap(), Err("gone".to_string()));
        assert!(acks.is_idle());
    }

    #[tokio::test]
    async fn test_ignore_policy_swallows_ack_failures_only() {
        struct Rejecting;

        #[async_trait]
        impl Transport for Rejecting {
            async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<()> {
                Err(ClientError::Subscribe {
                    topic: topic.to_string(),
                    reason: "rejected".to_string(),
                })
            }

            async fn publish(&self, _: &str, _: QoS, _: bool, _: Bytes) -> Result<()> {
                Err(ClientError::NotConnected)
            }

            async fn disconnect(&self, _grace: Duration) -> Result<()> {
                Ok(())
            }

            fn shutdown(&self) {}
        }

        let ignoring = ClientHandle::new(Arc::new(Rejecting), AckPolicy::Ignore);
        assert!(ignoring.subscribe("a", QoS::AtLeastOnce).await.is_ok());
        assert!(matches!(
            ignoring.publish("a", QoS::AtLeastOnce, false, "x").await,
            Err(ClientError::NotConnected)
        ));

        let reporting = ClientHandle::new(Arc::new(Rejecting), AckPolicy::Report);
        assert!(matches!(
            reporting.subscribe("a", QoS::AtLeastOnce).await,
            Err(ClientError::Subscribe { .. })
        ));
    }
}
