//! Transport adapters.
//!
//! Every frame-carrying medium implements [`Adapter`]: start and stop the
//! underlying resources, try a non-blocking send, and drain whatever arrived
//! since the last poll. MQTT is not a frame transport and lives behind its
//! own session seam in [`mqtt`].

pub mod mesh;
pub mod mqtt;
pub mod multicast;
pub mod udp;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::TransportError;

pub use mesh::MeshAdapter;
pub use multicast::MulticastAdapter;
pub use udp::UdpAdapter;

/// Receive buffer for datagram sockets; well above any frame we emit.
pub(crate) const DATAGRAM_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Udp,
    Multicast,
    Meshtastic,
    Mqtt,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Multicast => "multicast",
            Self::Meshtastic => "meshtastic",
            Self::Mqtt => "mqtt",
        }
    }

    /// Direct links this node can reach a peer over without the broker.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Mqtt)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payload pulled off a transport. `data` is the envelope, already
/// unframed.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub intf: InterfaceKind,
    pub data: Vec<u8>,
    pub from: String,
    pub time: SystemTime,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
}

impl InboundMessage {
    pub fn new(intf: InterfaceKind, from: impl Into<String>, data: Vec<u8>) -> Self {
        Self { intf, data, from: from.into(), time: SystemTime::now(), rssi: None, snr: None }
    }
}

pub trait Adapter: Send + Sync {
    fn kind(&self) -> InterfaceKind;

    /// Opens sockets or devices and spawns any listener tasks.
    fn start(&mut self) -> Result<(), TransportError>;

    /// Best-effort teardown. Safe to call on an adapter that never started.
    fn stop(&mut self);

    /// Non-blocking send of one already-framed datagram.
    fn try_send(&self, frame: &[u8], destination: Option<&str>) -> Result<(), TransportError>;

    /// Drains pending inbound messages; empty when nothing arrived.
    fn poll_receive(&self) -> Vec<InboundMessage>;
}

pub(crate) fn runtime() -> Result<Handle, TransportError> {
    Handle::try_current().map_err(|_| TransportError::NoRuntime)
}
