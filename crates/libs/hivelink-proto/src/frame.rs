//! Datagram framing for UDP, multicast and mesh links.

use rmpv::Value;

use crate::crc::crc16_ccitt_parts;
use crate::SYNC_BYTE;

const FRAME_ELEMENTS: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("length mismatch: expected {FRAME_ELEMENTS} frame elements, got {0}")]
    ElementCount(usize),

    #[error("sync byte mismatch: got {0}")]
    SyncMismatch(String),

    #[error("length mismatch: header says {declared}, payload is {actual}")]
    LengthMismatch { declared: u64, actual: usize },

    #[error("checksum mismatch: header {declared:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { declared: u16, computed: u16 },

    #[error("invalid {0} element")]
    InvalidElement(&'static str),

    #[error("address is not valid UTF-8")]
    InvalidAddress,

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),
}

/// A decoded datagram. An empty destination on the wire means broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: String,
    pub destination: Option<String>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }
}

pub fn encode_frame(
    source: &str,
    destination: Option<&str>,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let source = source.as_bytes();
    let destination = destination.unwrap_or_default().as_bytes();
    let checksum = crc16_ccitt_parts(&[source, destination, payload]);

    let frame = Value::Array(vec![
        Value::from(SYNC_BYTE),
        Value::from(payload.len() as u64),
        Value::from(checksum),
        Value::Binary(source.to_vec()),
        Value::Binary(destination.to_vec()),
        Value::Binary(payload.to_vec()),
    ]);
    Ok(rmp_serde::to_vec(&frame)?)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let value: Value = rmp_serde::from_slice(bytes)?;
    let Value::Array(items) = value else {
        return Err(FrameError::InvalidElement("frame"));
    };
    if items.len() != FRAME_ELEMENTS {
        return Err(FrameError::ElementCount(items.len()));
    }

    if items[0].as_u64() != Some(u64::from(SYNC_BYTE)) {
        return Err(FrameError::SyncMismatch(items[0].to_string()));
    }
    let declared_len = items[1].as_u64().ok_or(FrameError::InvalidElement("length"))?;
    let declared_crc = items[2]
        .as_u64()
        .and_then(|crc| u16::try_from(crc).ok())
        .ok_or(FrameError::InvalidElement("checksum"))?;
    let source = items[3].as_slice().ok_or(FrameError::InvalidElement("source"))?;
    let destination = items[4].as_slice().ok_or(FrameError::InvalidElement("destination"))?;
    let payload = items[5].as_slice().ok_or(FrameError::InvalidElement("payload"))?;

    if declared_len != payload.len() as u64 {
        return Err(FrameError::LengthMismatch { declared: declared_len, actual: payload.len() });
    }
    let computed = crc16_ccitt_parts(&[source, destination, payload]);
    if computed != declared_crc {
        return Err(FrameError::ChecksumMismatch { declared: declared_crc, computed });
    }

    let source = std::str::from_utf8(source).map_err(|_| FrameError::InvalidAddress)?;
    let destination = std::str::from_utf8(destination).map_err(|_| FrameError::InvalidAddress)?;
    Ok(Frame {
        source: source.to_string(),
        destination: (!destination.is_empty()).then(|| destination.to_string()),
        payload: payload.to_vec(),
    })
}
