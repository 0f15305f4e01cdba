use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use igd::{PortMappingProtocol, SearchOptions};
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug_span, info, warn};

use crate::spawn_utils::spawn;

/// Lease duration for forwarded ports. 0 keeps the mapping until it is
/// explicitly cleared.
const LEASE_DURATION_SECS: u32 = 0;

/// The operations the bridge needs from the discovered gateway. The real
/// implementation talks UPnP through the igd crate; tests substitute their
/// own.
#[async_trait]
pub trait PortMapper: Send + Sync + 'static {
    async fn external_ip(&self) -> anyhow::Result<Ipv4Addr>;
    async fn forward(&self, port: u16, description: &str) -> anyhow::Result<()>;
    async fn clear(&self, port: u16) -> anyhow::Result<()>;
}

pub struct IgdGateway {
    gateway: igd::aio::Gateway,
    local_ip: Ipv4Addr,
}

/// Discover exactly one IGD-capable gateway on the local network, bounded by
/// the timeout. The bridge can't do anything useful without one, so callers
/// treat failure as fatal.
pub async fn discover(timeout: Duration) -> anyhow::Result<IgdGateway> {
    let gateway = igd::aio::search_gateway(SearchOptions {
        timeout: Some(timeout),
        ..Default::default()
    })
    .await
    .context("error discovering IGD gateway")?;
    let nics = NetworkInterface::show().context("error listing network interfaces")?;
    let local_ip = get_local_ip_relative_to(*gateway.addr.ip(), &nics)?;
    info!(gateway = %gateway.addr, %local_ip, "gateway discovered");
    Ok(IgdGateway { gateway, local_ip })
}

// AddPortMapping redirects inbound traffic to whatever internal address we
// name, so pick our address on the interface sharing a subnet with the
// gateway.
fn get_local_ip_relative_to(
    gateway_ip: Ipv4Addr,
    interfaces: &[NetworkInterface],
) -> anyhow::Result<Ipv4Addr> {
    fn masked(ip: Ipv4Addr, mask: Ipv4Addr) -> u32 {
        ip.to_bits() & mask.to_bits()
    }

    for i in interfaces {
        for addr in i.addr.iter() {
            match (addr.ip(), addr.netmask()) {
                (IpAddr::V4(a), Some(IpAddr::V4(m))) if masked(a, m) == masked(gateway_ip, m) => {
                    return Ok(a);
                }
                _ => continue,
            }
        }
    }
    bail!("couldn't find a local ip address on the gateway's subnet")
}

#[async_trait]
impl PortMapper for IgdGateway {
    async fn external_ip(&self) -> anyhow::Result<Ipv4Addr> {
        let ip = self
            .gateway
            .get_external_ip()
            .await
            .context("error getting external IP from gateway")?;
        Ok(ip)
    }

    async fn forward(&self, port: u16, description: &str) -> anyhow::Result<()> {
        self.gateway
            .add_port(
                PortMappingProtocol::TCP,
                port,
                SocketAddrV4::new(self.local_ip, port),
                LEASE_DURATION_SECS,
                description,
            )
            .await
            .with_context(|| format!("error forwarding port {port}"))?;
        Ok(())
    }

    async fn clear(&self, port: u16) -> anyhow::Result<()> {
        self.gateway
            .remove_port(PortMappingProtocol::TCP, port)
            .await
            .with_context(|| format!("error clearing port {port}"))?;
        Ok(())
    }
}

/// One unit of work for the gateway worker. Forward and clear are
/// fire-and-forget, external IP queries carry a reply channel.
pub enum GatewayRequest {
    Forward {
        port: u16,
        description: String,
    },
    Clear {
        port: u16,
    },
    ExternalIp {
        reply: oneshot::Sender<anyhow::Result<Ipv4Addr>>,
    },
}

/// Cheap to clone handle to the gateway worker. All gateway access funnels
/// through it.
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::UnboundedSender<GatewayRequest>,
}

impl GatewayHandle {
    pub fn forward(&self, port: u16, description: String) {
        let _ = self.tx.send(GatewayRequest::Forward { port, description });
    }

    pub fn clear(&self, port: u16) {
        let _ = self.tx.send(GatewayRequest::Clear { port });
    }

    pub async fn external_ip(&self) -> anyhow::Result<Ipv4Addr> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GatewayRequest::ExternalIp { reply })
            .ok()
            .context("gateway worker is dead")?;
        rx.await.context("gateway worker dropped the request")?
    }
}

/// Spawn the single-consumer task owning the gateway. Requests drain
/// strictly in order, which makes every UPnP call mutually exclusive
/// between the command handler and the IP publisher loop.
pub fn spawn_worker(mapper: impl PortMapper) -> GatewayHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    spawn(debug_span!("gateway_worker"), run_worker(mapper, rx));
    GatewayHandle { tx }
}

async fn run_worker(
    mapper: impl PortMapper,
    mut rx: mpsc::UnboundedReceiver<GatewayRequest>,
) -> anyhow::Result<()> {
    while let Some(req) = rx.recv().await {
        match req {
            GatewayRequest::Forward { port, description } => {
                match mapper.forward(port, &description).await {
                    Ok(()) => info!(port, "port forwarded"),
                    Err(e) => warn!(port, "error forwarding port: {e:#}"),
                }
            }
            GatewayRequest::Clear { port } => match mapper.clear(port).await {
                Ok(()) => info!(port, "port mapping cleared"),
                Err(e) => warn!(port, "error clearing port: {e:#}"),
            },
            GatewayRequest::ExternalIp { reply } => {
                let _ = reply.send(mapper.external_ip().await);
            }
        }
    }
    Ok(())
}
