//! MQTT bridge.
//!
//! Decoded inbound traffic is republished as JSON under
//! `<base>/from/<this node>/<Category>/<Subcategory>/<Message>`. Commands
//! published to `<base>/to/<dest>/<Category>/<Subcategory>/<Message>` are
//! parsed back into encoded envelopes for local forwarding. Presence is a
//! retained `online`/`offline` marker on `<base>/from/<this node>/status`.

pub mod envelope;
pub mod session;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hivelink_proto::{decode_message, encode_message, CodecError, Schema, SchemaError};
use rumqttc::QoS;
use serde_json::Value;

use crate::config::DatalinkConfig;
use crate::error::TransportError;

use super::InboundMessage;

pub use envelope::{MqttEnvelope, B64_TAG};
pub use session::{MqttInbound, MqttSession, MqttSettings, RumqttSession};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("not a command topic: {0}")]
    Topic(String),

    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command body is not a JSON object")]
    NotObject,

    #[error("field {field}: {reason}")]
    Field { field: String, reason: String },

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A command pulled off the broker, already encoded as an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttCommand {
    pub dest: String,
    pub path: String,
    pub envelope: Vec<u8>,
    /// `from` in the body, when the publisher named itself.
    pub from: Option<String>,
}

pub struct MqttBridge {
    base: String,
    my_name: String,
    schema: Arc<Schema>,
    session: Box<dyn MqttSession>,
    running: bool,
}

impl MqttBridge {
    pub fn new(
        base: &str,
        my_name: &str,
        schema: Arc<Schema>,
        session: Box<dyn MqttSession>,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            my_name: my_name.to_string(),
            schema,
            session,
            running: false,
        }
    }

    pub fn from_config(config: &DatalinkConfig, schema: Arc<Schema>) -> Self {
        let base = config.mqtt.base();
        let settings = MqttSettings {
            host: config.mqtt.broker.clone(),
            port: config.mqtt.port,
            client_id: config.mqtt.client_id_for(&config.my_name),
            username: config.mqtt.username.clone(),
            password: config.mqtt.password.clone(),
            keep_alive: std::time::Duration::from_secs(config.mqtt.keep_alive_secs),
            status_topic: status_topic(base, &config.my_name),
            subscribe_topic: command_filter(base),
        };
        Self::new(base, &config.my_name, schema, Box::new(RumqttSession::new(settings)))
    }

    pub fn status_topic(&self) -> String {
        status_topic(&self.base, &self.my_name)
    }

    pub fn command_filter(&self) -> String {
        command_filter(&self.base)
    }

    /// `<base>/from/<this node>/<Category>/<Subcategory>/<Message>`.
    pub fn topic_for(&self, path: &str) -> String {
        format!("{}/from/{}/{}", self.base, self.my_name, path.replace('.', "/"))
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        self.session.connect()?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if self.session.is_connected() {
            let topic = self.status_topic();
            if let Err(err) =
                self.session.publish(&topic, session::STATUS_OFFLINE.to_vec(), QoS::AtLeastOnce, true)
            {
                log::debug!("mqtt_interface: offline marker not sent err={err}");
            }
        }
        self.session.disconnect();
        self.running = false;
    }

    /// Decodes and republishes one inbound message. Returns `Ok(false)` when
    /// the broker is not connected.
    pub fn publish_inbound(&self, message: &InboundMessage) -> Result<bool, BridgeError> {
        if !self.running || !self.session.is_connected() {
            return Ok(false);
        }
        let decoded = decode_message(&self.schema, &message.data)?;
        let time = unix_time(message.time);
        let body = MqttEnvelope::new(message.intf.as_str(), &decoded, &message.from, time);
        let topic = self.topic_for(&decoded.path);
        self.session.publish(&topic, body.to_vec()?, QoS::AtMostOnce, false)?;
        log::trace!("mqtt_interface: published topic={topic}");
        Ok(true)
    }

    pub fn poll_commands(&self) -> Vec<MqttInbound> {
        if !self.running {
            return Vec::new();
        }
        self.session.poll_inbound()
    }

    pub fn parse_command(&self, inbound: &MqttInbound) -> Result<MqttCommand, BridgeError> {
        let (dest, path) = self.split_command_topic(&inbound.topic)?;
        let spec = self.schema.lookup_path(&path)?;

        let body: Value = serde_json::from_slice(&inbound.payload)?;
        let Value::Object(body) = body else {
            return Err(BridgeError::NotObject);
        };
        let from = body.get("from").and_then(Value::as_str).map(str::to_string);
        let data = match body.get("data") {
            Some(Value::Object(data)) => data.clone(),
            Some(_) => return Err(BridgeError::NotObject),
            None => {
                let mut body = body;
                for key in ["intf", "msgid", "from", "time"] {
                    body.remove(key);
                }
                body
            }
        };

        let values = envelope::fields_from_json(&self.schema, spec, &data)?;
        let envelope = encode_message(&self.schema, spec.identity, &values)?;
        Ok(MqttCommand { dest, path, envelope, from })
    }

    fn split_command_topic(&self, topic: &str) -> Result<(String, String), BridgeError> {
        let invalid = || BridgeError::Topic(topic.to_string());
        let rest = topic
            .trim_start_matches('/')
            .strip_prefix(self.base.trim_start_matches('/'))
            .ok_or_else(invalid)?;
        let segments: Vec<&str> = rest.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["to", dest, category, subcategory, message]
                if [dest, category, subcategory, message].iter().all(|s| !s.is_empty()) =>
            {
                Ok((dest.to_string(), format!("{category}.{subcategory}.{message}")))
            }
            _ => Err(invalid()),
        }
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn status_topic(base: &str, my_name: &str) -> String {
    format!("{base}/from/{my_name}/status")
}

fn command_filter(base: &str) -> String {
    format!("{base}/to/+/+/+/+")
}

pub(crate) fn unix_time(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
