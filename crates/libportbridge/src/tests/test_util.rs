use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::gateway::PortMapper;
use crate::mqtt::StatusSink;

/// What [`RecordingMapper`] reports as the external IP when no scripted
/// results are queued.
pub const EXTERNAL_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);

/// Gateway double recording calls instead of talking UPnP.
#[derive(Default)]
pub struct RecordingMapper {
    pub forwards: Mutex<Vec<(u16, String)>>,
    pub clears: Mutex<Vec<u16>>,
    /// Scripted results for external_ip, drained front to back.
    pub ips: Mutex<VecDeque<anyhow::Result<Ipv4Addr>>>,
}

#[async_trait]
impl PortMapper for Arc<RecordingMapper> {
    async fn external_ip(&self) -> anyhow::Result<Ipv4Addr> {
        self.ips.lock().pop_front().unwrap_or(Ok(EXTERNAL_IP))
    }

    async fn forward(&self, port: u16, description: &str) -> anyhow::Result<()> {
        self.forwards.lock().push((port, description.to_owned()));
        Ok(())
    }

    async fn clear(&self, port: u16) -> anyhow::Result<()> {
        self.clears.lock().push(port);
        Ok(())
    }
}

/// Status sink double collecting published payloads.
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<String>>,
}

#[async_trait]
impl StatusSink for Arc<RecordingSink> {
    async fn publish(&self, payload: &str) -> anyhow::Result<()> {
        self.published.lock().push(payload.to_owned());
        Ok(())
    }
}
