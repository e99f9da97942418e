//! Meshtastic stream API over a serial port.
//!
//! Each protobuf is wrapped as `0x94 0xC3 <len_hi> <len_lo> <bytes>`. Bytes
//! outside a frame are the radio's debug console and are dropped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use rand_core::{OsRng, RngCore};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::iface::runtime;
use crate::inbox::Inbox;

use super::proto::{
    from_radio, mesh_packet, routing_error_name, Data, FromRadio, MeshPacket, Routing, ToRadio,
    DEFAULT_HOP_LIMIT, PORTNUM_ROUTING_APP,
};
use super::{MeshMail, MeshRadio};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const MAX_TO_FROM_RADIO_SIZE: usize = 512;

const HEADER_LEN: usize = 4;
const TX_QUEUE_CAPACITY: usize = 32;
const READ_BUFFER_SIZE: usize = 1024;

pub fn encode_stream_frame(message: &[u8]) -> Result<Vec<u8>, TransportError> {
    if message.len() > MAX_TO_FROM_RADIO_SIZE {
        return Err(TransportError::PayloadTooLarge {
            size: message.len(),
            mtu: MAX_TO_FROM_RADIO_SIZE,
        });
    }
    let len = message.len() as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + message.len());
    frame.extend_from_slice(&[START1, START2]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(message);
    Ok(frame)
}

/// Incremental decoder for the serial byte stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes in and returns every complete protobuf body seen so far.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            match self.buffer.iter().position(|b| *b == START1) {
                Some(0) => {}
                Some(start) => {
                    self.buffer.drain(..start);
                }
                None => {
                    self.buffer.clear();
                    break;
                }
            }
            if self.buffer.len() < 2 {
                break;
            }
            if self.buffer[1] != START2 {
                self.buffer.drain(..1);
                continue;
            }
            if self.buffer.len() < HEADER_LEN {
                break;
            }
            let len = usize::from(u16::from_be_bytes([self.buffer[2], self.buffer[3]]));
            if len > MAX_TO_FROM_RADIO_SIZE {
                // Corrupt header; resync on the next start byte.
                self.buffer.drain(..1);
                continue;
            }
            if self.buffer.len() < HEADER_LEN + len {
                break;
            }
            frames.push(self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec());
            self.buffer.drain(..HEADER_LEN + len);
        }
        frames
    }
}

/// A Meshtastic radio attached over USB serial.
pub struct SerialMeshRadio {
    device: String,
    baud_rate: u32,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    mailbox: Arc<Inbox<MeshMail>>,
    my_node_num: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl SerialMeshRadio {
    pub fn new<T: Into<String>>(device: T, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            tx: None,
            mailbox: Arc::new(Inbox::new()),
            my_node_num: Arc::new(AtomicU32::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    fn enqueue(&self, message: &ToRadio) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::NotStarted)?;
        let frame = encode_stream_frame(&message.encode_to_vec())?;
        tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::RadioUnavailable("serial link closed".to_string())
            }
        })
    }
}

impl MeshRadio for SerialMeshRadio {
    fn open(&mut self) -> Result<(), TransportError> {
        let handle = runtime()?;
        let port = {
            let _guard = handle.enter();
            tokio_serial::new(self.device.clone(), self.baud_rate).open_native_async().map_err(
                |err| {
                    TransportError::RadioUnavailable(format!(
                        "open failed device={} baud_rate={} err={err}",
                        self.device, self.baud_rate
                    ))
                },
            )?
        };
        log::info!("meshtastic_interface: opened device={} baud_rate={}", self.device, self.baud_rate);

        let (mut reader, writer) = tokio::io::split(port);
        let (tx, rx) = mpsc::channel::<Vec<u8>>(TX_QUEUE_CAPACITY);
        self.cancel = CancellationToken::new();

        handle.spawn(run_writer(writer, rx, self.cancel.clone(), self.device.clone()));

        {
            let cancel = self.cancel.clone();
            let device = self.device.clone();
            let mailbox = self.mailbox.clone();
            let my_node_num = self.my_node_num.clone();
            handle.spawn(async move {
                let mut decoder = StreamDecoder::new();
                let mut buffer = [0u8; READ_BUFFER_SIZE];
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = reader.read(&mut buffer) => match result {
                            Ok(0) => {
                                log::warn!("meshtastic_interface: device closed device={device}");
                                cancel.cancel();
                                break;
                            }
                            Ok(n) => {
                                for body in decoder.push(&buffer[..n]) {
                                    match FromRadio::decode(body.as_slice()) {
                                        Ok(message) => handle_from_radio(message, &mailbox, &my_node_num),
                                        Err(err) => log::debug!("meshtastic_interface: undecodable FromRadio err={err}"),
                                    }
                                }
                            }
                            Err(err) => {
                                log::warn!("meshtastic_interface: read failed device={device} err={err}");
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        },
                    }
                }
                log::info!("meshtastic_interface: closed device={device}");
            });
        }

        self.tx = Some(tx);
        self.enqueue(&ToRadio::want_config(OsRng.next_u32()))
    }

    fn close(&mut self) {
        if self.tx.is_some() {
            if let Err(err) = self.enqueue(&ToRadio::disconnect()) {
                log::debug!("meshtastic_interface: disconnect not sent err={err}");
            }
        }
        self.tx = None;
        self.cancel.cancel();
    }

    fn my_node_num(&self) -> Option<u32> {
        match self.my_node_num.load(Ordering::Relaxed) {
            0 => None,
            num => Some(num),
        }
    }

    fn send_data(
        &self,
        payload: &[u8],
        destination: u32,
        port_num: u32,
        want_ack: bool,
    ) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::RadioUnavailable("serial link closed".to_string()));
        }
        let packet = MeshPacket {
            to: destination,
            id: packet_id(),
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: port_num as i32,
                payload: payload.to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        };
        self.enqueue(&ToRadio::packet(packet))
    }

    fn check_mail(&self) -> Vec<MeshMail> {
        self.mailbox.drain()
    }
}

impl Drop for SerialMeshRadio {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drains queued stream frames onto the serial port. Any write or flush error
/// takes the whole link down.
async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    device: String,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            log::warn!("meshtastic_interface: write failed device={device} err={err}");
            cancel.cancel();
            break;
        }
    }
}

fn packet_id() -> u32 {
    loop {
        let id = OsRng.next_u32();
        if id != 0 {
            return id;
        }
    }
}

pub(crate) fn handle_from_radio(
    message: FromRadio,
    mailbox: &Inbox<MeshMail>,
    my_node_num: &AtomicU32,
) {
    match message.payload_variant {
        Some(from_radio::PayloadVariant::MyInfo(info)) => {
            my_node_num.store(info.my_node_num, Ordering::Relaxed);
            log::info!("meshtastic_interface: my node num={:#010x}", info.my_node_num);
        }
        Some(from_radio::PayloadVariant::Packet(packet)) => {
            let Some(mesh_packet::PayloadVariant::Decoded(data)) = packet.payload_variant else {
                log::trace!("meshtastic_interface: skipping encrypted packet from={:#010x}", packet.from);
                return;
            };
            if data.portnum == PORTNUM_ROUTING_APP {
                if let Ok(routing) = Routing::decode(data.payload.as_slice()) {
                    let reason = routing.error_reason();
                    if reason != 0 {
                        log::warn!(
                            "meshtastic_interface: delivery failed request_id={:#010x} reason={}",
                            data.request_id,
                            routing_error_name(reason)
                        );
                    }
                }
                return;
            }
            mailbox.push(MeshMail {
                from: packet.from,
                port_num: data.portnum as u32,
                payload: data.payload,
                rx_time: packet.rx_time,
                rssi: (packet.rx_rssi != 0).then_some(packet.rx_rssi),
                snr: (packet.rx_snr != 0.0).then_some(packet.rx_snr),
            });
        }
        Some(from_radio::PayloadVariant::ConfigCompleteId(id)) => {
            log::debug!("meshtastic_interface: config complete id={id}");
        }
        Some(from_radio::PayloadVariant::Rebooted(_)) => {
            log::warn!("meshtastic_interface: radio rebooted");
        }
        None => {}
    }
}
