//! Typed messaging on top of [`DatalinkInterface`].

use std::collections::HashMap;
use std::sync::Arc;

use hivelink_proto::{
    decode_message, encode_named, CodecError, DecodedMessage, FieldValue, MessageIdentity, Schema,
    SchemaError,
};

use crate::config::DatalinkConfig;
use crate::datalink::{DatalinkInterface, SendFlags, SendOutcome};
use crate::error::{ConfigError, DatalinkError};
use crate::iface::InboundMessage;

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Names a message either by `Category.Subcategory.Message` or by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRef<'a> {
    Path(&'a str),
    Identity(MessageIdentity),
}

impl<'a> From<&'a str> for MessageRef<'a> {
    fn from(path: &'a str) -> Self {
        Self::Path(path)
    }
}

impl From<MessageIdentity> for MessageRef<'_> {
    fn from(identity: MessageIdentity) -> Self {
        Self::Identity(identity)
    }
}

/// A decoded message together with the transport metadata it arrived with.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub inbound: InboundMessage,
    pub message: DecodedMessage,
}

pub struct CommNode {
    link: DatalinkInterface,
    schema: Arc<Schema>,
}

impl CommNode {
    pub fn new(link: DatalinkInterface, schema: Arc<Schema>) -> Self {
        Self { link, schema }
    }

    pub fn from_config(config: &DatalinkConfig, schema: Arc<Schema>) -> Result<Self, ConfigError> {
        let link = DatalinkInterface::new(config, schema.clone())?;
        Ok(Self::new(link, schema))
    }

    pub fn link(&self) -> &DatalinkInterface {
        &self.link
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn start(&mut self) -> Result<(), DatalinkError> {
        self.link.start()
    }

    pub fn stop(&mut self) {
        self.link.stop();
    }

    pub fn send_message<'a>(
        &self,
        message: impl Into<MessageRef<'a>>,
        fields: &HashMap<String, FieldValue>,
        destination: Option<&str>,
        flags: SendFlags,
    ) -> Result<SendOutcome, CommError> {
        let identity = match message.into() {
            MessageRef::Path(path) => self.schema.lookup_path(path)?.identity,
            MessageRef::Identity(identity) => identity,
        };
        let envelope = encode_named(&self.schema, identity, fields)?;
        Ok(self.link.send(&envelope, destination, flags)?)
    }

    /// Drains the link and decodes what arrived. Messages that do not decode
    /// against the schema are dropped.
    pub fn receive_messages(&self) -> Vec<ReceivedMessage> {
        self.link
            .receive()
            .into_iter()
            .filter_map(|inbound| match decode_message(&self.schema, &inbound.data) {
                Ok(message) => Some(ReceivedMessage { inbound, message }),
                Err(err) => {
                    log::debug!(
                        "comm: undecodable message from={} intf={} err={err}",
                        inbound.from,
                        inbound.intf
                    );
                    None
                }
            })
            .collect()
    }
}
