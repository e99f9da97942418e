//! Mesh radio transport.
//!
//! Frames ride as the payload of Meshtastic data packets on a private
//! application port. Radio node numbers translate to node names through the
//! node table.

pub mod proto;
pub mod serial;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hivelink_proto::{decode_frame, MAX_MESH_PACKET_SIZE};

use crate::error::TransportError;
use crate::node::NodeTable;

use super::{Adapter, InboundMessage, InterfaceKind};

pub use proto::BROADCAST_NUM;
pub use serial::SerialMeshRadio;

/// One data packet handed up by the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshMail {
    pub from: u32,
    pub port_num: u32,
    pub payload: Vec<u8>,
    /// Seconds since the epoch; zero when the radio had no clock.
    pub rx_time: u32,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
}

/// Seam between the adapter and a physical (or fake) radio.
pub trait MeshRadio: Send + Sync {
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self);
    fn my_node_num(&self) -> Option<u32>;
    fn send_data(
        &self,
        payload: &[u8],
        destination: u32,
        port_num: u32,
        want_ack: bool,
    ) -> Result<(), TransportError>;
    fn check_mail(&self) -> Vec<MeshMail>;
}

pub struct MeshAdapter {
    radio: Box<dyn MeshRadio>,
    nodes: Arc<NodeTable>,
    port_num: u32,
    running: bool,
}

impl MeshAdapter {
    pub fn new(radio: Box<dyn MeshRadio>, nodes: Arc<NodeTable>, port_num: u32) -> Self {
        Self { radio, nodes, port_num, running: false }
    }

    pub fn my_node_num(&self) -> Option<u32> {
        self.radio.my_node_num()
    }

    fn resolve(&self, destination: Option<&str>) -> Result<u32, TransportError> {
        match destination.filter(|dest| !dest.is_empty()) {
            None => Ok(BROADCAST_NUM),
            Some(dest) => self
                .nodes
                .mesh_id_of(dest)
                .ok_or_else(|| TransportError::UnknownDestination(dest.to_string())),
        }
    }

    fn to_inbound(&self, mail: MeshMail) -> Option<InboundMessage> {
        let frame = match decode_frame(&mail.payload) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("meshtastic_interface: discarded frame from={:#010x} err={err}", mail.from);
                return None;
            }
        };
        if frame.payload.is_empty() {
            return None;
        }

        let from = match self.nodes.name_for_mesh_id(mail.from) {
            Some(name) => name.to_string(),
            None if !frame.source.is_empty() => frame.source,
            None => mail.from.to_string(),
        };
        let time = match mail.rx_time {
            0 => SystemTime::now(),
            secs => UNIX_EPOCH + Duration::from_secs(u64::from(secs)),
        };
        Some(InboundMessage {
            intf: InterfaceKind::Meshtastic,
            data: frame.payload,
            from,
            time,
            rssi: mail.rssi,
            snr: mail.snr,
        })
    }
}

impl Adapter for MeshAdapter {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Meshtastic
    }

    fn start(&mut self) -> Result<(), TransportError> {
        self.radio.open()?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.radio.close();
            self.running = false;
        }
    }

    fn try_send(&self, frame: &[u8], destination: Option<&str>) -> Result<(), TransportError> {
        if !self.running {
            return Err(TransportError::NotStarted);
        }
        if frame.len() > MAX_MESH_PACKET_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: frame.len(),
                mtu: MAX_MESH_PACKET_SIZE,
            });
        }
        let dest = self.resolve(destination)?;
        self.radio.send_data(frame, dest, self.port_num, true)?;
        log::trace!("meshtastic_interface: tx dest={dest:#010x} len={}", frame.len());
        Ok(())
    }

    fn poll_receive(&self) -> Vec<InboundMessage> {
        self.radio
            .check_mail()
            .into_iter()
            .filter(|mail| mail.port_num == self.port_num)
            .filter_map(|mail| self.to_inbound(mail))
            .collect()
    }
}
