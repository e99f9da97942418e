use std::io;

use hivelink_proto::FrameError;

/// Deployment or caller mistakes. Fatal at construction/start time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one datalink mode (udp or meshtastic) must be enabled")]
    NoTransport,

    #[error("multicast requires udp.multicast_group and a multicast port")]
    MulticastWithoutGroup,

    #[error("meshtastic requires meshtastic.radio_serial")]
    MeshWithoutRadio,

    #[error("mqtt requires mqtt.broker")]
    MqttWithoutBroker,

    #[error("my_name must not be empty")]
    MissingName,

    #[error("invalid {field}: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("interface is already running")]
    AlreadyRunning,

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Per-transport delivery failures. Never retried by the datalink.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("interface not started")]
    NotStarted,

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("interface disabled")]
    Disabled,

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("payload of {size} bytes exceeds {mtu} byte link MTU")]
    PayloadTooLarge { size: usize, mtu: usize },

    #[error("transmit queue full")]
    QueueFull,

    #[error("radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DatalinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{iface}: {source}")]
    Transport {
        iface: &'static str,
        #[source]
        source: TransportError,
    },
}
