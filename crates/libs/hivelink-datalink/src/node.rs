use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::config::NodeConfig;
use crate::error::ConfigError;

/// Static addressing for one known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub mesh_id: Option<u32>,
    pub ip: Option<SocketAddr>,
}

/// Read-only peer table, with the radio id reverse map built once.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: HashMap<String, NodeRecord>,
    by_mesh_id: HashMap<u32, String>,
}

impl NodeTable {
    pub fn new(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            if let Some(mesh_id) = record.mesh_id.filter(|id| *id != 0) {
                table.by_mesh_id.insert(mesh_id, record.name.clone());
            }
            table.nodes.insert(record.name.clone(), record);
        }
        table
    }

    pub fn from_config<'a>(
        nodes: impl IntoIterator<Item = (&'a String, &'a NodeConfig)>,
    ) -> Result<Self, ConfigError> {
        let mut records = Vec::new();
        for (name, node) in nodes {
            let ip = match &node.ip {
                Some((host, port)) => {
                    let addr: IpAddr = host.parse().map_err(|_| ConfigError::InvalidAddress {
                        field: format!("nodes.{name}.ip"),
                        value: host.clone(),
                    })?;
                    Some(SocketAddr::new(addr, *port))
                }
                None => None,
            };
            records.push(NodeRecord { name: name.clone(), mesh_id: node.mesh_id, ip });
        }
        Ok(Self::new(records))
    }

    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn ip_of(&self, name: &str) -> Option<SocketAddr> {
        self.nodes.get(name).and_then(|node| node.ip)
    }

    pub fn mesh_id_of(&self, name: &str) -> Option<u32> {
        self.nodes.get(name).and_then(|node| node.mesh_id).filter(|id| *id != 0)
    }

    pub fn name_for_mesh_id(&self, mesh_id: u32) -> Option<&str> {
        self.by_mesh_id.get(&mesh_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
