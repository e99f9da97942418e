//! Broker session seam and its rumqttc implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::iface::runtime;
use crate::inbox::Inbox;

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub const STATUS_ONLINE: &[u8] = b"online";
pub const STATUS_OFFLINE: &[u8] = b"offline";

/// A publish received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttInbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Retained `online`/`offline` marker, also used as the last will.
    pub status_topic: String,
    /// Filter (re)subscribed after every successful connect.
    pub subscribe_topic: String,
}

pub trait MqttSession: Send + Sync {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;
    fn poll_inbound(&self) -> Vec<MqttInbound>;
    fn disconnect(&mut self);
}

pub struct RumqttSession {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    inbound: Arc<Inbox<MqttInbound>>,
    cancel: CancellationToken,
}

impl RumqttSession {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            inbound: Arc::new(Inbox::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    fn options(&self) -> MqttOptions {
        let settings = &self.settings;
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
        if settings.username.is_some() || settings.password.is_some() {
            options.set_credentials(
                settings.username.clone().unwrap_or_default(),
                settings.password.clone().unwrap_or_default(),
            );
        }
        options.set_last_will(LastWill::new(
            settings.status_topic.clone(),
            STATUS_OFFLINE.to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
        options
    }
}

impl MqttSession for RumqttSession {
    fn connect(&mut self) -> Result<(), TransportError> {
        let handle = runtime()?;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        self.cancel = CancellationToken::new();
        self.closing.store(false, Ordering::Relaxed);
        log::info!(
            "mqtt_interface: connecting broker={}:{} client_id={}",
            self.settings.host,
            self.settings.port,
            self.settings.client_id
        );

        let cancel = self.cancel.clone();
        let connected = self.connected.clone();
        let closing = self.closing.clone();
        let inbound = self.inbound.clone();
        let subscriber = client.clone();
        let status_topic = self.settings.status_topic.clone();
        let subscribe_topic = self.settings.subscribe_topic.clone();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code != ConnectReturnCode::Success {
                                log::warn!("mqtt_interface: connect refused code={:?}", ack.code);
                                continue;
                            }
                            connected.store(true, Ordering::Relaxed);
                            log::info!("mqtt_interface: connected");
                            if let Err(err) = subscriber.try_subscribe(subscribe_topic.clone(), QoS::AtMostOnce) {
                                log::warn!("mqtt_interface: subscribe failed topic={subscribe_topic} err={err}");
                            }
                            if let Err(err) = subscriber.try_publish(status_topic.clone(), QoS::AtLeastOnce, true, STATUS_ONLINE.to_vec()) {
                                log::warn!("mqtt_interface: status publish failed err={err}");
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            inbound.push(MqttInbound {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                            });
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            connected.store(false, Ordering::Relaxed);
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            connected.store(false, Ordering::Relaxed);
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            let was_connected = connected.swap(false, Ordering::Relaxed);
                            if closing.load(Ordering::Relaxed) {
                                break;
                            }
                            if was_connected {
                                log::warn!("mqtt_interface: connection lost err={err}");
                            } else {
                                log::debug!("mqtt_interface: connect failed err={err}");
                            }
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    },
                }
            }
            log::info!("mqtt_interface: closed");
        });

        self.client = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotStarted)?;
        client
            .try_publish(topic, qos, retain, payload)
            .map_err(|err| TransportError::BrokerUnavailable(err.to_string()))
    }

    fn poll_inbound(&self) -> Vec<MqttInbound> {
        self.inbound.drain()
    }

    fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        self.closing.store(true, Ordering::Relaxed);
        if let Err(err) = client.try_disconnect() {
            log::debug!("mqtt_interface: disconnect request failed err={err}");
            self.cancel.cancel();
            return;
        }
        // Give the event loop a moment to flush the offline marker.
        let cancel = self.cancel.clone();
        match runtime() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(DISCONNECT_GRACE).await;
                    cancel.cancel();
                });
            }
            Err(_) => cancel.cancel(),
        }
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        // After disconnect() the grace timer owns cancellation.
        if self.client.is_some() {
            self.cancel.cancel();
        }
    }
}
