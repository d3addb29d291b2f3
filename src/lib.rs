pub mod config;
pub mod mqtt;

pub use rumqttc::{MqttOptions, QoS};
