//! Subset of the Meshtastic device API protobufs used over the serial link.
//!
//! Field tags follow `meshtastic/mesh.proto`; anything not declared here is
//! skipped on decode.

/// Destination meaning "every node".
pub const BROADCAST_NUM: u32 = 0xFFFF_FFFF;

pub const PORTNUM_TEXT_MESSAGE_APP: i32 = 1;
pub const PORTNUM_ROUTING_APP: i32 = 5;
pub const PORTNUM_PRIVATE_APP: i32 = 256;

pub const DEFAULT_HOP_LIMIT: u32 = 3;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4")]
    pub payload_variant: Option<to_radio::PayloadVariant>,
}

pub mod to_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        #[prost(bool, tag = "4")]
        Disconnect(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 7, 8")]
    pub payload_variant: Option<from_radio::PayloadVariant>,
}

pub mod from_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        #[prost(bool, tag = "8")]
        Rebooted(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        #[prost(bytes = "vec", tag = "5")]
        Encrypted(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Routing {
    #[prost(oneof = "routing::Variant", tags = "3")]
    pub variant: Option<routing::Variant>,
}

pub mod routing {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        /// `Routing.Error`; zero means delivered.
        #[prost(int32, tag = "3")]
        ErrorReason(i32),
    }
}

impl Routing {
    pub fn error_reason(&self) -> i32 {
        match self.variant {
            Some(routing::Variant::ErrorReason(reason)) => reason,
            None => 0,
        }
    }
}

pub fn routing_error_name(reason: i32) -> &'static str {
    match reason {
        0 => "NONE",
        1 => "NO_ROUTE",
        2 => "GOT_NAK",
        3 => "TIMEOUT",
        4 => "NO_INTERFACE",
        5 => "MAX_RETRANSMIT",
        6 => "NO_CHANNEL",
        7 => "TOO_LARGE",
        8 => "NO_RESPONSE",
        9 => "DUTY_CYCLE_LIMIT",
        32 => "BAD_REQUEST",
        33 => "NOT_AUTHORIZED",
        _ => "UNKNOWN",
    }
}

impl ToRadio {
    pub fn packet(packet: MeshPacket) -> Self {
        Self { payload_variant: Some(to_radio::PayloadVariant::Packet(packet)) }
    }

    pub fn want_config(id: u32) -> Self {
        Self { payload_variant: Some(to_radio::PayloadVariant::WantConfigId(id)) }
    }

    pub fn disconnect() -> Self {
        Self { payload_variant: Some(to_radio::PayloadVariant::Disconnect(true)) }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn data_packet_roundtrip() {
        let packet = MeshPacket {
            to: BROADCAST_NUM,
            id: 7,
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack: true,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: 260,
                payload: vec![0xFA, 0x00, 0x01],
                ..Default::default()
            })),
            ..Default::default()
        };
        let bytes = ToRadio::packet(packet.clone()).encode_to_vec();
        let decoded = ToRadio::decode(bytes.as_slice()).expect("decode");
        assert_eq!(decoded.payload_variant, Some(to_radio::PayloadVariant::Packet(packet)));
    }

    #[test]
    fn routing_error_reason() {
        let routing = Routing { variant: Some(routing::Variant::ErrorReason(5)) };
        let decoded = Routing::decode(routing.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(decoded.error_reason(), 5);
        assert_eq!(routing_error_name(decoded.error_reason()), "MAX_RETRANSMIT");
        assert_eq!(Routing::default().error_reason(), 0);
    }
}
