use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_INCUMBENT_WINDOW_SECS: u64 = 600;
pub const DEFAULT_MQTT_BASE: &str = "/hivelink/v1";
pub const DEFAULT_APP_PORTNUM: u32 = 260;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatalinkConfig {
    pub my_name: String,
    #[serde(default)]
    pub my_id: u32,
    #[serde(default = "default_incumbent_window_secs")]
    pub incumbent_window_secs: u64,
    #[serde(default)]
    pub udp: UdpConfig,
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default, alias = "nodemap")]
    pub nodes: BTreeMap<String, NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    #[serde(alias = "use")]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub use_multicast: bool,
    pub multicast_group: Option<String>,
    /// Falls back to `port` when unset.
    pub multicast_port: Option<u16>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 5555,
            use_multicast: false,
            multicast_group: None,
            multicast_port: None,
        }
    }
}

impl UdpConfig {
    pub fn effective_multicast_port(&self) -> u16 {
        self.multicast_port.unwrap_or(self.port)
    }

    pub fn multicast_configured(&self) -> bool {
        self.multicast_group.as_deref().is_some_and(|group| !group.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    #[serde(alias = "use")]
    pub enabled: bool,
    pub radio_serial: Option<String>,
    pub baud_rate: u32,
    pub app_portnum: u32,
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self { enabled: false, radio_serial: None, baud_rate: 115_200, app_portnum: DEFAULT_APP_PORTNUM }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: String::new(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            base: DEFAULT_MQTT_BASE.to_string(),
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Topic root without a trailing slash.
    pub fn base(&self) -> &str {
        self.base.trim_end_matches('/')
    }

    pub fn client_id_for(&self, my_name: &str) -> String {
        match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ if !my_name.is_empty() => my_name.to_string(),
            _ => "hivelink-node".to_string(),
        }
    }
}

/// A peer entry under `[nodes.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default, alias = "meshid")]
    pub mesh_id: Option<u32>,
    #[serde(default)]
    pub ip: Option<(String, u16)>,
}

fn default_incumbent_window_secs() -> u64 {
    DEFAULT_INCUMBENT_WINDOW_SECS
}

impl DatalinkConfig {
    pub fn new(my_name: impl Into<String>) -> Self {
        Self {
            my_name: my_name.into(),
            my_id: 0,
            incumbent_window_secs: DEFAULT_INCUMBENT_WINDOW_SECS,
            udp: UdpConfig::default(),
            meshtastic: MeshtasticConfig::default(),
            mqtt: MqttConfig::default(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_toml(&contents)
    }

    pub fn incumbent_window(&self) -> Duration {
        Duration::from_secs(self.incumbent_window_secs)
    }

    /// Checks everything that can be checked before a socket or port is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.my_name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if !self.udp.enabled && !self.meshtastic.enabled {
            return Err(ConfigError::NoTransport);
        }

        if self.udp.enabled {
            self.host_addr()?;
            if self.udp.use_multicast {
                self.multicast_group()?;
            }
        }
        if self.meshtastic.enabled
            && self.meshtastic.radio_serial.as_deref().map_or(true, |dev| dev.trim().is_empty())
        {
            return Err(ConfigError::MeshWithoutRadio);
        }
        if self.mqtt.enabled && self.mqtt.broker.trim().is_empty() {
            return Err(ConfigError::MqttWithoutBroker);
        }

        for (name, node) in &self.nodes {
            if let Some((host, _)) = &node.ip {
                host.parse::<IpAddr>().map_err(|_| ConfigError::InvalidAddress {
                    field: format!("nodes.{name}.ip"),
                    value: host.clone(),
                })?;
            }
        }
        Ok(())
    }

    pub(crate) fn host_addr(&self) -> Result<Ipv4Addr, ConfigError> {
        self.udp.host.parse().map_err(|_| ConfigError::InvalidAddress {
            field: "udp.host".to_string(),
            value: self.udp.host.clone(),
        })
    }

    pub(crate) fn multicast_group(&self) -> Result<Ipv4Addr, ConfigError> {
        let group = self
            .udp
            .multicast_group
            .as_deref()
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .ok_or(ConfigError::MulticastWithoutGroup)?;
        match group.parse::<Ipv4Addr>() {
            Ok(addr) if addr.is_multicast() => Ok(addr),
            _ => Err(ConfigError::InvalidAddress {
                field: "udp.multicast_group".to_string(),
                value: group.to_string(),
            }),
        }
    }
}
