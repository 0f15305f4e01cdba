use anyhow::{Context, bail};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::debug;

/// Outgoing request queue size. Only the control subscription and one
/// in-flight status publish ever go through it.
const REQUEST_CAP: usize = 64;

/// Broker connection parameters as given on the command line.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// host:port, e.g. 192.168.1.1:1883.
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Open the single long-lived broker connection. Resolves only once the
/// broker acknowledged the MQTT handshake, so Ok means connected, not just
/// trying.
pub async fn connect(
    config: &BrokerConfig,
    client_id: &str,
) -> anyhow::Result<(AsyncClient, EventLoop)> {
    let (host, port) = split_host_port(&config.address)?;
    let mut opts = MqttOptions::new(client_id, host, port);
    if let Some((user, password)) = credentials(config) {
        opts.set_credentials(user, password);
    }

    let (client, mut eventloop) = AsyncClient::new(opts, REQUEST_CAP);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    bail!("MQTT broker refused the connection: {:?}", ack.code);
                }
                return Ok((client, eventloop));
            }
            Ok(ev) => debug!(event = ?ev, "event while waiting for CONNACK"),
            Err(e) => return Err(e).context("error connecting to MQTT broker"),
        }
    }
}

// Credentials are attached only when both halves are present and non-empty.
// A lone username or password connects anonymously.
fn credentials(config: &BrokerConfig) -> Option<(&str, &str)> {
    match (&config.username, &config.password) {
        (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
            Some((user, password))
        }
        _ => None,
    }
}

fn split_host_port(address: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .with_context(|| format!("invalid broker address {address:?}, expected host:port"))?;
    if host.is_empty() {
        bail!("invalid broker address {address:?}, expected host:port");
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid broker port in {address:?}"))?;
    Ok((host.to_owned(), port))
}

/// Where external IP observations go. Production publishes to the status
/// topic over MQTT; tests record payloads.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn publish(&self, payload: &str) -> anyhow::Result<()>;
}

pub struct MqttStatusPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttStatusPublisher {
    pub fn new(client: AsyncClient, topic: String) -> Self {
        Self { client, topic }
    }
}

#[async_trait]
impl StatusSink for MqttStatusPublisher {
    // QoS 0, not retained. Subscribers only care about the current value,
    // and a missed sample gets republished one period later anyway.
    async fn publish(&self, payload: &str) -> anyhow::Result<()> {
        self.client
            .publish(
                self.topic.as_str(),
                QoS::AtMostOnce,
                false,
                payload.to_owned(),
            )
            .await
            .with_context(|| format!("error publishing to {}", self.topic))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("192.168.1.1:1883").unwrap(),
            ("192.168.1.1".to_owned(), 1883)
        );
        assert_eq!(
            split_host_port("broker.local:8883").unwrap(),
            ("broker.local".to_owned(), 8883)
        );
        assert!(split_host_port("no-port-here").is_err());
        assert!(split_host_port(":1883").is_err());
        assert!(split_host_port("broker.local:notaport").is_err());
        assert!(split_host_port("broker.local:99999").is_err());
    }

    #[test]
    fn test_credentials_require_both_halves() {
        fn config(username: Option<&str>, password: Option<&str>) -> BrokerConfig {
            BrokerConfig {
                address: "broker:1883".to_owned(),
                username: username.map(str::to_owned),
                password: password.map(str::to_owned),
            }
        }

        assert_eq!(
            credentials(&config(Some("user"), Some("pass"))),
            Some(("user", "pass"))
        );
        assert_eq!(credentials(&config(Some("user"), None)), None);
        assert_eq!(credentials(&config(None, Some("pass"))), None);
        assert_eq!(credentials(&config(Some("user"), Some(""))), None);
        assert_eq!(credentials(&config(None, None)), None);
    }
}
