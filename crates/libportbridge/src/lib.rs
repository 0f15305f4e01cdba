//! Bridges the local gateway's UPnP/IGD port mapping control plane to MQTT.
//!
//! The bridge discovers a single IGD-capable gateway at startup, publishes
//! the gateway's external IP to `<topic>/externalip` on a fixed interval,
//! and applies port mapping commands received on `<topic>/portmapping`.
//!
//! All gateway access is funneled through one worker task, so UPnP calls
//! coming from the command handler and from the IP publisher loop never
//! interleave.

mod bridge;
mod command;
mod gateway;
mod mqtt;
mod spawn_utils;

#[cfg(test)]
mod tests;

pub use bridge::{Bridge, BridgeOptions};
pub use command::{CommandKind, PortCommand};
pub use gateway::{GatewayHandle, IgdGateway, PortMapper, discover, spawn_worker};
pub use mqtt::{BrokerConfig, MqttStatusPublisher, StatusSink};
pub use spawn_utils::spawn;
