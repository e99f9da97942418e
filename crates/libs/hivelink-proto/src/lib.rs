//! # hivelink-proto
//!
//! Message schema, envelope codec and datagram framing for Hivelink nodes.
//!
//! Every message is identified by a `(category, subcategory, message)` triple
//! and carries an ordered, typed field list. Field position is the only thing
//! that identifies a field on the wire, so all nodes must agree on the schema.
//!
//! ## Envelope
//!
//! ```text
//! msgpack [category, subcategory, message, [field, ...]]
//! ```
//!
//! ## Datagram frame
//!
//! ```text
//! msgpack [0xFA, payload_len, crc16, source, destination, payload]
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE over `source || destination || payload`.
//!
//! ## Example
//!
//! ```rust
//! use hivelink_proto::{builtin, codec, frame, FieldValue};
//!
//! let schema = builtin::schema().unwrap();
//! let spec = schema.lookup_path("Status.System.POSITION").unwrap();
//! let envelope = codec::encode_message(
//!     &schema,
//!     spec.identity,
//!     &[FieldValue::Int(158334550), FieldValue::Int(208988410)],
//! )
//! .unwrap();
//! let wire = frame::encode_frame("gcs1", Some("drone1"), &envelope).unwrap();
//!
//! let frame = frame::decode_frame(&wire).unwrap();
//! let decoded = codec::decode_message(&schema, &frame.payload).unwrap();
//! assert_eq!(decoded.get("lat"), Some(&FieldValue::Int(158334550)));
//! ```

pub mod builtin;
pub mod codec;
pub mod crc;
pub mod frame;
pub mod schema;
pub mod value;

pub use codec::{decode_message, encode_message, encode_named, CodecError, DecodedMessage};
pub use frame::{decode_frame, encode_frame, Frame, FrameError};
pub use schema::{
    DataType, FieldSpec, MessageIdentity, MessageSpec, PayloadEnum, Schema, SchemaDescription,
    SchemaError,
};
pub use value::{EnumValue, FieldValue};

/// Frame start marker.
pub const SYNC_BYTE: u8 = 0xFA;

/// Largest frame the mesh radio link carries in one packet.
pub const MAX_MESH_PACKET_SIZE: usize = 220;
