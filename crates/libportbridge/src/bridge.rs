use std::time::Duration;

use anyhow::Context;
use rumqttc::{Event, EventLoop, Packet, QoS};
use tracing::{debug, debug_span, info, warn};

use crate::command::{self, CommandKind};
use crate::gateway::{self, GatewayHandle};
use crate::mqtt::{self, BrokerConfig, MqttStatusPublisher, StatusSink};
use crate::spawn_utils::spawn;

/// Client id presented to the broker.
const CLIENT_ID: &str = "portbridge";

/// How long SSDP discovery may take before startup fails.
const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after an MQTT connection error before polling (and thereby letting
/// rumqttc reconnect) again.
const MQTT_RETRY_SLEEP: Duration = Duration::from_secs(1);

pub struct BridgeOptions {
    pub broker: BrokerConfig,
    /// Base topic. Control messages arrive on `<topic>/portmapping`,
    /// external IP observations go to `<topic>/externalip`.
    pub topic: String,
    /// Interval between external IP polls.
    pub poll_period: Duration,
    pub discover_timeout: Option<Duration>,
}

pub struct Bridge {
    gateway: GatewayHandle,
    publisher: MqttStatusPublisher,
    poll_period: Duration,
}

impl Bridge {
    /// Startup sequence: broker first, then the gateway, then the control
    /// subscription. Every failure here is fatal, there is nothing to
    /// bridge without either end.
    pub async fn start(opts: BridgeOptions) -> anyhow::Result<Self> {
        let (client, eventloop) = mqtt::connect(&opts.broker, CLIENT_ID)
            .await
            .context("error connecting to MQTT broker")?;
        info!(broker = %opts.broker.address, "connected to MQTT broker");

        let mapper = gateway::discover(opts.discover_timeout.unwrap_or(DEFAULT_DISCOVER_TIMEOUT))
            .await
            .context("error discovering router")?;
        let gateway = gateway::spawn_worker(mapper);

        let control_topic = format!("{}/portmapping", opts.topic);
        client
            .subscribe(control_topic.as_str(), QoS::AtMostOnce)
            .await
            .with_context(|| format!("error subscribing to topic {control_topic}"))?;
        info!(topic = %control_topic, "subscribed to control topic");

        spawn(
            debug_span!("mqtt_event_loop"),
            run_event_loop(eventloop, gateway.clone()),
        );

        Ok(Self {
            gateway,
            publisher: MqttStatusPublisher::new(client, format!("{}/externalip", opts.topic)),
            poll_period: opts.poll_period,
        })
    }

    /// The IP publisher loop. Never returns; the process runs until killed.
    pub async fn run_forever(self) -> anyhow::Result<()> {
        run_ip_publisher(self.gateway, self.publisher, self.poll_period).await
    }
}

/// Drives the rumqttc event loop forever. It both delivers inbound control
/// messages and flushes outgoing publishes. Connection errors after startup
/// are logged and polling continues; reconnecting is rumqttc's business.
async fn run_event_loop(mut eventloop: EventLoop, gateway: GatewayHandle) -> anyhow::Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_control_message(&publish.payload, &gateway);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {e:#}");
                tokio::time::sleep(MQTT_RETRY_SLEEP).await;
            }
        }
    }
}

/// Decode one inbound control message and hand it to the gateway worker.
/// Undecodable messages are logged and dropped.
fn handle_control_message(payload: &[u8], gateway: &GatewayHandle) {
    debug!(payload = %String::from_utf8_lossy(payload), "control message received");
    let cmd = match command::decode(payload) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("error decoding control message: {e:#}");
            return;
        }
    };
    match cmd.kind {
        CommandKind::Forward => gateway.forward(cmd.port, cmd.description.unwrap_or_default()),
        CommandKind::Clear => gateway.clear(cmd.port),
        CommandKind::Unknown => {}
    }
}

/// Poll the gateway for its external IP on a fixed interval and publish each
/// successful observation as plain text. A failed query or publish skips the
/// cycle, never the loop.
async fn run_ip_publisher(
    gateway: GatewayHandle,
    sink: impl StatusSink,
    period: Duration,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let ip = match gateway.external_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("error getting external IP from gateway: {e:#}");
                continue;
            }
        };
        info!(%ip, "external IP");
        if let Err(e) = sink.publish(&ip.to_string()).await {
            warn!("error publishing external IP: {e:#}");
        }
    }
}
