//! Routing of inbound messages to registered handlers
//!
//! The transport hands every inbound PUBLISH to [`Dispatcher::dispatch`]. The
//! handler registered for the exact topic runs if there is one, otherwise the
//! fallback ("except") handler. The catch-all handler runs afterwards in either
//! case.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::message_manager::MQTTMessage;
use super::transport::ClientHandle;

/// Callback for inbound messages
pub type MessageHandler = Arc<dyn Fn(&ClientHandle, &MQTTMessage) + Send + Sync>;

/// Callback run after every successful CONNACK
pub type ConnectHandler = Arc<dyn Fn(&ClientHandle) + Send + Sync>;

/// Callback run when the transport reports a connection error
pub type ConnectionLostHandler = Arc<dyn Fn(&ClientHandle, &str) + Send + Sync>;

/// Which of the first-stage handlers took a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A handler registered for the message topic
    Topic,
    /// No topic handler; the fallback handler ran
    Fallback,
    /// Neither a topic handler nor a fallback was registered
    Unhandled,
}

/// Outcome of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub route: Route,
    pub catch_all: bool,
}

#[derive(Default)]
struct Handlers {
    by_topic: HashMap<String, MessageHandler>,
    except: Option<MessageHandler>,
    all: Option<MessageHandler>,
    on_connect: Option<ConnectHandler>,
    on_connection_lost: Option<ConnectionLostHandler>,
}

/// Handler table and callback slots shared between the client and its event loop
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<Handlers>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`, returning the handler it replaced
    pub fn set_handler(
        &self,
        topic: impl Into<String>,
        handler: MessageHandler,
    ) -> Option<MessageHandler> {
        self.handlers.write().by_topic.insert(topic.into(), handler)
    }

    pub fn remove_handler(&self, topic: &str) -> Option<MessageHandler> {
        self.handlers.write().by_topic.remove(topic)
    }

    pub fn has_handler(&self, topic: &str) -> bool {
        self.handlers.read().by_topic.contains_key(topic)
    }

    pub fn set_fallback(&self, handler: MessageHandler) {
        self.handlers.write().except = Some(handler);
    }

    pub fn set_catch_all(&self, handler: MessageHandler) {
        self.handlers.write().all = Some(handler);
    }

    pub fn set_on_connect(&self, handler: ConnectHandler) {
        self.handlers.write().on_connect = Some(handler);
    }

    pub fn set_on_connection_lost(&self, handler: ConnectionLostHandler) {
        self.handlers.write().on_connection_lost = Some(handler);
    }

    /// Routes one inbound message.
    ///
    /// Handlers are cloned out of the table before they run, so a handler may
    /// register or replace handlers without deadlocking.
    pub fn dispatch(&self, client: &ClientHandle, message: &MQTTMessage) -> Delivery {
        let (primary, all) = {
            let handlers = self.handlers.read();
            match handlers.by_topic.get(message.topic()) {
                Some(handler) => (Some((Route::Topic, handler.clone())), handlers.all.clone()),
                None => (
                    handlers
                        .except
                        .clone()
                        .map(|handler| (Route::Fallback, handler)),
                    handlers.all.clone(),
                ),
            }
        };

        let route = match primary {
            Some((route, handler)) => {
                handler(client, message);
                route
            }
            None => Route::Unhandled,
        };

        let catch_all = match all {
            Some(handler) => {
                handler(client, message);
                true
            }
            None => false,
        };

        if route == Route::Unhandled && !catch_all {
            debug!("Dropping message on '{}': no handler", message.topic());
        } else {
            trace!(
                "Dispatched message on '{}': {:?}, catch-all: {}",
                message.topic(),
                route,
                catch_all
            );
        }

        Delivery { route, catch_all }
    }

    pub fn connected(&self, client: &ClientHandle) {
        let handler = self.handlers.read().on_connect.clone();
        if let Some(handler) = handler {
            handler(client);
        }
    }

    pub fn connection_lost(&self, client: &ClientHandle, reason: &str) {
        let handler = self.handlers.read().on_connection_lost.clone();
        if let Some(handler) = handler {
            handler(client, reason);
        }
    }
}
