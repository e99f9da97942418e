//! # hivelink-datalink
//!
//! Moves Hivelink frames between nodes over UDP unicast, UDP multicast and a
//! serial-attached Meshtastic radio, and bridges decoded traffic to an MQTT
//! broker.
//!
//! [`DatalinkInterface`] owns one adapter per enabled transport. `send` tries
//! the requested transports in order (multicast, unicast, mesh) and stops at
//! the first that accepts the frame. `receive` drains everything collected by
//! the adapters' background tasks, records each sender's presence and
//! republishes decodable messages to MQTT.
//!
//! Commands published to `<base>/to/<node>/<Category>/<Subcategory>/<Message>`
//! are forwarded onto local transports only while `<node>` is incumbent, that
//! is, heard on UDP, multicast or mesh within the incumbent window.
//!
//! [`CommNode`] wraps the interface with the schema so callers work in typed
//! field maps instead of envelopes.
//!
//! Adapters spawn their listeners on the current tokio runtime, so `start`
//! must be called from within one.

pub mod comm;
pub mod config;
pub mod datalink;
pub mod error;
pub mod iface;
pub mod inbox;
pub mod node;
pub mod presence;

pub use comm::{CommError, CommNode, MessageRef, ReceivedMessage};
pub use config::DatalinkConfig;
pub use datalink::{Adapters, DatalinkInterface, LinkState, SendFlags, SendOutcome};
pub use error::{ConfigError, DatalinkError, TransportError};
pub use iface::{Adapter, InboundMessage, InterfaceKind};
pub use node::{NodeRecord, NodeTable};
pub use presence::{LinkQuality, PresenceRecord, PresenceTable};
