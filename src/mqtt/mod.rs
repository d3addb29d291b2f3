//! # MQTT Client Façade
//!
//! Thin layer over `rumqttc` that keeps a list of topics, routes inbound
//! messages to per-topic handlers and passes connect / subscribe / publish /
//! close through to the transport.
//!
//! ## Why This Module Exists
//!
//! `rumqttc` hands every inbound PUBLISH to whoever polls its event loop. Most
//! applications then grow the same `match topic { ... }` block. This module
//! replaces it with a handler table, a fallback handler for topics without a
//! handler and a catch-all handler that sees everything.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address, credentials, transport settings
//! ├── dispatcher.rs       - Handler table and message routing
//! ├── error.rs            - ClientError / ConfigError
//! ├── message_manager.rs  - Inbound message representation
//! ├── mqtt_handler.rs     - KClient, the façade itself
//! ├── topics.rs           - Ordered, deduplicated topic list
//! └── transport.rs        - Connector/Transport seam and the rumqttc event loop
//! ```
//!
//! ## Message Routing
//!
//! ```text
//! rumqttc EventLoop ─[Publish]→ Dispatcher ─┬→ topic handler   (exact match)
//!                                           ├→ except handler  (no match)
//!                                           └→ all handler     (always, last)
//! ```
//!
//! ## What Is Delegated
//!
//! Packet encoding, QoS retries, keep-alive and reconnecting are `rumqttc`'s
//! job. The façade only waits for the acknowledgments `rumqttc` reports.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topics;
pub mod transport;

pub use config::{AckPolicy, BrokerAddress, ClientConfig, ClientSettings, Credentials};
pub use dispatcher::{Delivery, Dispatcher, MessageHandler, Route};
pub use error::{ClientError, ConfigError};
pub use message_manager::MQTTMessage;
pub use mqtt_handler::{ConnectionState, KClient, PendingSubscription, SubscriptionBatch};
pub use topics::TopicSet;
pub use transport::{ClientHandle, Connector, RumqttcConnector, Transport};
