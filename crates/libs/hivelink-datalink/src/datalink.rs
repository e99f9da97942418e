//! The datalink interface: one send path and one receive path over every
//! enabled transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hivelink_proto::{encode_frame, Schema};

use crate::config::DatalinkConfig;
use crate::error::{ConfigError, DatalinkError, TransportError};
use crate::iface::mesh::{MeshAdapter, SerialMeshRadio};
use crate::iface::mqtt::{MqttBridge, MqttCommand};
use crate::iface::{Adapter, InboundMessage, InterfaceKind, MulticastAdapter, UdpAdapter};
use crate::inbox::Inbox;
use crate::node::NodeTable;
use crate::presence::{LinkQuality, PresenceRecord, PresenceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Stopped,
    Starting,
    Running,
}

/// Which transports a send may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    pub udp: bool,
    pub meshtastic: bool,
    pub multicast: bool,
}

impl SendFlags {
    pub const fn udp() -> Self {
        Self { udp: true, meshtastic: false, multicast: false }
    }

    pub const fn meshtastic() -> Self {
        Self { udp: false, meshtastic: true, multicast: false }
    }

    pub const fn multicast() -> Self {
        Self { udp: false, meshtastic: false, multicast: true }
    }

    pub const fn with_udp(mut self) -> Self {
        self.udp = true;
        self
    }

    pub const fn with_meshtastic(mut self) -> Self {
        self.meshtastic = true;
        self
    }

    pub const fn with_multicast(mut self) -> Self {
        self.multicast = true;
        self
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    /// Accepted by this transport; no further transports were tried.
    Sent(InterfaceKind),
    /// Every requested transport failed, in the order tried.
    NotSent(Vec<(InterfaceKind, TransportError)>),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }

    pub fn failures(&self) -> &[(InterfaceKind, TransportError)] {
        match self {
            Self::Sent(_) => &[],
            Self::NotSent(failures) => failures,
        }
    }
}

/// The enabled transports. Any slot may hold a custom or fake adapter.
#[derive(Default)]
pub struct Adapters {
    pub udp: Option<Box<dyn Adapter>>,
    pub multicast: Option<Box<dyn Adapter>>,
    pub mesh: Option<Box<dyn Adapter>>,
    pub mqtt: Option<MqttBridge>,
}

impl Adapters {
    pub fn from_config(
        config: &DatalinkConfig,
        nodes: Arc<NodeTable>,
        schema: Arc<Schema>,
    ) -> Result<Self, ConfigError> {
        let mut adapters = Self::default();

        if config.udp.enabled {
            let host = config.host_addr()?;
            let bind_addr = SocketAddr::new(host.into(), config.udp.port);
            adapters.udp = Some(Box::new(UdpAdapter::new(bind_addr, nodes.clone())));

            if config.udp.use_multicast || config.udp.multicast_configured() {
                let group = config.multicast_group()?;
                let port = config.udp.effective_multicast_port();
                adapters.multicast = Some(Box::new(MulticastAdapter::new(group, port, host)));
            }
        }

        if config.meshtastic.enabled {
            let device =
                config.meshtastic.radio_serial.clone().ok_or(ConfigError::MeshWithoutRadio)?;
            let radio = SerialMeshRadio::new(device, config.meshtastic.baud_rate);
            adapters.mesh = Some(Box::new(MeshAdapter::new(
                Box::new(radio),
                nodes,
                config.meshtastic.app_portnum,
            )));
        }

        if config.mqtt.enabled {
            adapters.mqtt = Some(MqttBridge::from_config(config, schema));
        }
        Ok(adapters)
    }

    fn frame_adapters(&self) -> impl Iterator<Item = &dyn Adapter> {
        [&self.udp, &self.multicast, &self.mesh].into_iter().flatten().map(|adapter| &**adapter)
    }

    fn frame_adapters_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Adapter>> {
        [&mut self.udp, &mut self.multicast, &mut self.mesh].into_iter().flatten()
    }
}

pub struct DatalinkInterface {
    my_name: String,
    my_id: u32,
    state: LinkState,
    adapters: Adapters,
    nodes: Arc<NodeTable>,
    presence: PresenceTable,
    inbox: Inbox<InboundMessage>,
}

impl DatalinkInterface {
    pub fn new(config: &DatalinkConfig, schema: Arc<Schema>) -> Result<Self, ConfigError> {
        config.validate()?;
        let nodes = Arc::new(NodeTable::from_config(&config.nodes)?);
        let adapters = Adapters::from_config(config, nodes.clone(), schema)?;
        let mut link =
            Self::with_adapters(&config.my_name, nodes, adapters, config.incumbent_window());
        link.my_id = config.my_id;
        Ok(link)
    }

    /// Assembles an interface from prebuilt adapters.
    pub fn with_adapters(
        my_name: &str,
        nodes: Arc<NodeTable>,
        adapters: Adapters,
        incumbent_window: Duration,
    ) -> Self {
        Self {
            my_name: my_name.to_string(),
            my_id: 0,
            state: LinkState::Stopped,
            adapters,
            nodes,
            presence: PresenceTable::new(incumbent_window),
            inbox: Inbox::new(),
        }
    }

    pub fn my_name(&self) -> &str {
        &self.my_name
    }

    pub fn my_id(&self) -> u32 {
        self.my_id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn start(&mut self) -> Result<(), DatalinkError> {
        if self.state != LinkState::Stopped {
            return Err(ConfigError::AlreadyRunning.into());
        }
        self.state = LinkState::Starting;

        let mut failure = None;
        for adapter in self.adapters.frame_adapters_mut() {
            let kind = adapter.kind();
            if let Err(source) = adapter.start() {
                failure = Some(DatalinkError::Transport { iface: kind.as_str(), source });
                break;
            }
            log::info!("datalink: interface up iface={kind}");
        }
        if let Some(err) = failure {
            log::warn!("datalink: start failed {err}");
            self.adapters.frame_adapters_mut().for_each(|adapter| adapter.stop());
            self.state = LinkState::Stopped;
            return Err(err);
        }

        if let Some(bridge) = self.adapters.mqtt.as_mut() {
            if let Err(err) = bridge.start() {
                log::warn!("mqtt_interface: setup failed, bridging disabled err={err}");
                self.adapters.mqtt = None;
            }
        }

        self.state = LinkState::Running;
        log::info!("datalink: running name={} id={}", self.my_name, self.my_id);
        Ok(())
    }

    /// Tears down every adapter. Never fails.
    pub fn stop(&mut self) {
        if let Some(bridge) = self.adapters.mqtt.as_mut() {
            bridge.stop();
        }
        self.adapters.frame_adapters_mut().for_each(|adapter| adapter.stop());
        if self.state != LinkState::Stopped {
            log::info!("datalink: stopped name={}", self.my_name);
        }
        self.state = LinkState::Stopped;
    }

    /// Sends `payload` on the first requested transport that accepts it,
    /// trying multicast, then unicast UDP, then the mesh radio.
    ///
    /// Routing failures come back as [`SendOutcome::NotSent`]; only asking for
    /// a transport that was never configured is an error.
    pub fn send(
        &self,
        payload: &[u8],
        destination: Option<&str>,
        flags: SendFlags,
    ) -> Result<SendOutcome, ConfigError> {
        let destination = destination.filter(|dest| !dest.is_empty());
        if flags.multicast && self.adapters.multicast.is_none() {
            return Err(ConfigError::MulticastWithoutGroup);
        }

        let attempts = [
            (flags.multicast, InterfaceKind::Multicast, &self.adapters.multicast),
            (flags.udp, InterfaceKind::Udp, &self.adapters.udp),
            (flags.meshtastic, InterfaceKind::Meshtastic, &self.adapters.mesh),
        ];
        let mut failures = Vec::new();
        for (requested, kind, adapter) in attempts {
            if !requested {
                continue;
            }
            let result = match adapter.as_deref() {
                Some(adapter) => encode_frame(&self.my_name, destination, payload)
                    .map_err(TransportError::from)
                    .and_then(|frame| adapter.try_send(&frame, destination)),
                None => Err(TransportError::Disabled),
            };
            match result {
                Ok(()) => {
                    log::debug!(
                        "datalink: sent iface={kind} dest={} len={}",
                        destination.unwrap_or("*"),
                        payload.len()
                    );
                    return Ok(SendOutcome::Sent(kind));
                }
                Err(err) => {
                    log::warn!(
                        "datalink: send failed iface={kind} dest={} err={err}",
                        destination.unwrap_or("*")
                    );
                    failures.push((kind, err));
                }
            }
        }
        Ok(SendOutcome::NotSent(failures))
    }

    /// Drains everything received since the last call.
    ///
    /// Each returned message is handed out exactly once, updates its sender's
    /// presence, and is republished to MQTT when bridging is up. Pending MQTT
    /// commands are forwarded first.
    pub fn receive(&self) -> Vec<InboundMessage> {
        self.forward_mqtt_commands();

        for adapter in self.adapters.frame_adapters() {
            self.inbox.extend(adapter.poll_receive());
        }
        let messages = self.inbox.drain();

        for message in &messages {
            let quality = LinkQuality { rssi: message.rssi, snr: message.snr, latency: None };
            self.presence.update(&message.from, message.intf, quality, Some(message.time));
            if let Some(bridge) = &self.adapters.mqtt {
                if let Err(err) = bridge.publish_inbound(message) {
                    log::debug!("mqtt_interface: not republished from={} err={err}", message.from);
                }
            }
        }
        messages
    }

    pub fn update_presence(
        &self,
        peer: &str,
        intf: InterfaceKind,
        quality: LinkQuality,
        seen_at: Option<SystemTime>,
    ) {
        self.presence.update(peer, intf, quality, seen_at);
    }

    pub fn is_incumbent(&self, peer: &str) -> bool {
        self.presence.is_incumbent(peer)
    }

    pub fn presence_snapshot(&self) -> Vec<(String, PresenceRecord)> {
        self.presence.snapshot()
    }

    fn forward_mqtt_commands(&self) {
        let Some(bridge) = &self.adapters.mqtt else {
            return;
        };
        for inbound in bridge.poll_commands() {
            match bridge.parse_command(&inbound) {
                Ok(command) => {
                    self.forward_command(&command);
                }
                Err(err) => {
                    log::warn!(
                        "mqtt_interface: discarded command topic={} err={err}",
                        inbound.topic
                    );
                }
            }
        }
    }

    /// Forwards a broker command onto local transports, but only to a
    /// destination recently heard on one of them. Returns whether any
    /// transport accepted it.
    pub fn forward_command(&self, command: &MqttCommand) -> bool {
        if let Some(from) = &command.from {
            self.presence.update(from, InterfaceKind::Mqtt, LinkQuality::default(), None);
        }
        if !self.presence.is_incumbent_local(&command.dest) {
            log::debug!(
                "mqtt_interface: dropped command dest={} path={} reason=not_incumbent",
                command.dest,
                command.path
            );
            return false;
        }

        let dest = Some(command.dest.as_str());
        let mut sent = false;
        if self.nodes.contains(&command.dest) {
            if self.adapters.udp.is_some() {
                sent |= self.try_forward(&command.envelope, dest, SendFlags::udp());
            }
            if self.adapters.mesh.is_some() {
                sent |= self.try_forward(&command.envelope, dest, SendFlags::meshtastic());
            }
        }
        if !sent && self.adapters.multicast.is_some() {
            sent = self.try_forward(&command.envelope, None, SendFlags::multicast());
        }
        log::debug!(
            "mqtt_interface: command dest={} path={} forwarded={sent}",
            command.dest,
            command.path
        );
        sent
    }

    fn try_forward(&self, envelope: &[u8], dest: Option<&str>, flags: SendFlags) -> bool {
        self.send(envelope, dest, flags).is_ok_and(|outcome| outcome.is_sent())
    }
}

impl Drop for DatalinkInterface {
    fn drop(&mut self) {
        if self.state != LinkState::Stopped {
            self.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use hivelink_proto::{builtin, decode_frame, encode_message, FieldValue};
    use serde_json::json;

    use super::*;
    use crate::iface::mesh::tests::FakeRadio;
    use crate::iface::mqtt::session::MqttInbound;
    use crate::iface::mqtt::tests::FakeSession;
    use crate::node::NodeRecord;

    /// Records every frame it is asked to send.
    #[derive(Clone)]
    pub(crate) struct FakeAdapter {
        pub kind: InterfaceKind,
        pub sent: Arc<Mutex<Vec<(Vec<u8>, Option<String>)>>>,
        pub inbound: Arc<Inbox<InboundMessage>>,
        pub fail: bool,
    }

    impl FakeAdapter {
        pub fn new(kind: InterfaceKind) -> Self {
            Self {
                kind,
                sent: Arc::default(),
                inbound: Arc::new(Inbox::new()),
                fail: false,
            }
        }

        pub fn failing(kind: InterfaceKind) -> Self {
            Self { fail: true, ..Self::new(kind) }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().expect("sent").len()
        }
    }

    impl Adapter for FakeAdapter {
        fn kind(&self) -> InterfaceKind {
            self.kind
        }

        fn start(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn try_send(&self, frame: &[u8], destination: Option<&str>) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::QueueFull);
            }
            if self.kind == InterfaceKind::Udp && destination.is_none() {
                return Err(TransportError::UnknownDestination(String::new()));
            }
            self.sent
                .lock()
                .expect("sent")
                .push((frame.to_vec(), destination.map(str::to_string)));
            Ok(())
        }

        fn poll_receive(&self) -> Vec<InboundMessage> {
            self.inbound.drain()
        }
    }

    pub(crate) fn nodes() -> Arc<NodeTable> {
        Arc::new(NodeTable::new([
            NodeRecord {
                name: "drone1".to_string(),
                mesh_id: Some(0xABCD),
                ip: Some("127.0.0.1:5556".parse().expect("addr")),
            },
            NodeRecord { name: "drone2".to_string(), mesh_id: None, ip: None },
        ]))
    }

    fn link(adapters: Adapters) -> DatalinkInterface {
        let mut link =
            DatalinkInterface::with_adapters("gcs1", nodes(), adapters, Duration::from_secs(600));
        link.start().expect("start");
        link
    }

    fn position_envelope(lat: i64) -> Vec<u8> {
        let schema = builtin::schema().expect("schema");
        let spec = schema.lookup_path("Status.System.POSITION").expect("position");
        encode_message(&schema, spec.identity, &[FieldValue::Int(lat), FieldValue::Int(0)])
            .expect("encode")
    }

    #[test]
    fn multicast_success_skips_unicast() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let multicast = FakeAdapter::new(InterfaceKind::Multicast);
        let link = link(Adapters {
            udp: Some(Box::new(udp.clone())),
            multicast: Some(Box::new(multicast.clone())),
            ..Adapters::default()
        });

        let outcome = link
            .send(b"payload", Some("drone1"), SendFlags::multicast().with_udp())
            .expect("send");
        assert!(matches!(outcome, SendOutcome::Sent(InterfaceKind::Multicast)));
        assert_eq!(multicast.sent_count(), 1);
        assert_eq!(udp.sent_count(), 0);

        let (frame, _) = multicast.sent.lock().expect("sent")[0].clone();
        let frame = decode_frame(&frame).expect("frame");
        assert_eq!(frame.source, "gcs1");
        assert_eq!(frame.destination.as_deref(), Some("drone1"));
        assert_eq!(frame.payload, b"payload");
    }

    #[test]
    fn multicast_without_group_is_a_config_error() {
        let link = link(Adapters {
            udp: Some(Box::new(FakeAdapter::new(InterfaceKind::Udp))),
            ..Adapters::default()
        });
        assert!(matches!(
            link.send(b"payload", None, SendFlags::multicast()),
            Err(ConfigError::MulticastWithoutGroup)
        ));
    }

    #[test]
    fn falls_through_to_mesh_when_udp_fails() {
        let udp = FakeAdapter::failing(InterfaceKind::Udp);
        let mesh = FakeAdapter::new(InterfaceKind::Meshtastic);
        let link = link(Adapters {
            udp: Some(Box::new(udp)),
            mesh: Some(Box::new(mesh.clone())),
            ..Adapters::default()
        });

        let outcome = link
            .send(b"payload", Some("drone1"), SendFlags::udp().with_meshtastic())
            .expect("send");
        assert!(matches!(outcome, SendOutcome::Sent(InterfaceKind::Meshtastic)));
        assert_eq!(mesh.sent_count(), 1);
    }

    #[test]
    fn unsent_reports_each_failure() {
        let link = link(Adapters {
            udp: Some(Box::new(FakeAdapter::new(InterfaceKind::Udp))),
            ..Adapters::default()
        });
        let outcome =
            link.send(b"payload", None, SendFlags::udp().with_meshtastic()).expect("send");
        assert!(!outcome.is_sent());
        let failures = outcome.failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], (InterfaceKind::Udp, TransportError::UnknownDestination(_))));
        assert!(matches!(failures[1], (InterfaceKind::Meshtastic, TransportError::Disabled)));
    }

    #[test]
    fn nothing_requested_is_not_sent() {
        let link = link(Adapters {
            udp: Some(Box::new(FakeAdapter::new(InterfaceKind::Udp))),
            ..Adapters::default()
        });
        let outcome = link.send(b"payload", Some("drone1"), SendFlags::default()).expect("send");
        assert!(!outcome.is_sent());
        assert!(outcome.failures().is_empty());
    }

    #[test]
    fn mesh_radio_broadcasts_empty_destination() {
        let radio = FakeRadio::default();
        let sent = radio.sent.clone();
        let mesh = MeshAdapter::new(Box::new(radio), nodes(), 260);
        let link = link(Adapters { mesh: Some(Box::new(mesh)), ..Adapters::default() });

        let outcome = link.send(b"payload", Some(""), SendFlags::meshtastic()).expect("send");
        assert!(outcome.is_sent());
        assert_eq!(sent.lock().expect("sent")[0].destination, crate::iface::mesh::BROADCAST_NUM);
    }

    #[test]
    fn receive_drains_once_and_updates_presence() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let mesh = FakeAdapter::new(InterfaceKind::Meshtastic);
        let link = link(Adapters {
            udp: Some(Box::new(udp.clone())),
            mesh: Some(Box::new(mesh.clone())),
            ..Adapters::default()
        });

        udp.inbound.push(InboundMessage::new(InterfaceKind::Udp, "drone2", position_envelope(1)));
        let mut from_mesh =
            InboundMessage::new(InterfaceKind::Meshtastic, "drone1", b"junk".to_vec());
        from_mesh.rssi = Some(-101);
        mesh.inbound.push(from_mesh);

        let first = link.receive();
        assert_eq!(first.len(), 2);
        assert!(link.receive().is_empty());

        assert!(link.is_incumbent("drone1"));
        assert!(link.is_incumbent("drone2"));
        assert_eq!(link.presence().get("drone1").expect("record").rssi, Some(-101));
        assert!(!link.is_incumbent("drone3"));
    }

    #[test]
    fn receive_republishes_to_mqtt_and_survives_bad_payloads() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let session = FakeSession::default();
        let published = session.published.clone();
        let schema = Arc::new(builtin::schema().expect("schema"));
        let bridge = MqttBridge::new("/hivelink/v1", "gcs1", schema, Box::new(session));
        let link = link(Adapters {
            udp: Some(Box::new(udp.clone())),
            mqtt: Some(bridge),
            ..Adapters::default()
        });

        udp.inbound.push(InboundMessage::new(InterfaceKind::Udp, "drone1", b"junk".to_vec()));
        udp.inbound.push(InboundMessage::new(InterfaceKind::Udp, "drone1", position_envelope(7)));

        let received = link.receive();
        assert_eq!(received.len(), 2);
        let published = published.lock().expect("published");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/hivelink/v1/from/gcs1/Status/System/POSITION");
    }

    fn mqtt_link(
        udp: &FakeAdapter,
        multicast: Option<&FakeAdapter>,
    ) -> (DatalinkInterface, FakeSession) {
        let session = FakeSession::default();
        let schema = Arc::new(builtin::schema().expect("schema"));
        let bridge = MqttBridge::new("/hivelink/v1", "gcs1", schema, Box::new(session.clone()));
        let link = link(Adapters {
            udp: Some(Box::new(udp.clone())),
            multicast: multicast.map(|m| Box::new(m.clone()) as Box<dyn Adapter>),
            mqtt: Some(bridge),
            ..Adapters::default()
        });
        (link, session)
    }

    fn takeoff_command(dest: &str) -> MqttInbound {
        MqttInbound {
            topic: format!("/hivelink/v1/to/{dest}/Command/AP/TAKEOFF"),
            payload: serde_json::to_vec(&json!({ "data": { "alt_m": 30 } })).expect("json"),
        }
    }

    #[test]
    fn mqtt_command_for_incumbent_peer_is_forwarded() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let (link, session) = mqtt_link(&udp, None);

        link.update_presence("drone1", InterfaceKind::Udp, LinkQuality::default(), None);
        session.inbound.push(takeoff_command("drone1"));
        link.receive();

        let sent = udp.sent.lock().expect("sent");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_deref(), Some("drone1"));
        let frame = decode_frame(&sent[0].0).expect("frame");
        let schema = builtin::schema().expect("schema");
        let decoded = hivelink_proto::decode_message(&schema, &frame.payload).expect("decode");
        assert_eq!(decoded.path, "Command.AP.TAKEOFF");
    }

    #[test]
    fn mqtt_command_for_stale_or_unknown_peer_is_dropped() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let (link, session) = mqtt_link(&udp, None);

        let stale = SystemTime::now() - Duration::from_secs(601);
        link.update_presence("drone1", InterfaceKind::Udp, LinkQuality::default(), Some(stale));
        session.inbound.push(takeoff_command("drone1"));
        session.inbound.push(takeoff_command("nobody"));
        link.receive();
        assert_eq!(udp.sent_count(), 0);
    }

    #[test]
    fn mqtt_only_presence_does_not_open_the_gate() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let (link, session) = mqtt_link(&udp, None);

        link.update_presence("drone1", InterfaceKind::Mqtt, LinkQuality::default(), None);
        session.inbound.push(takeoff_command("drone1"));
        link.receive();
        assert_eq!(udp.sent_count(), 0);
    }

    #[test]
    fn mqtt_from_hint_keeps_local_incumbency() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let (link, session) = mqtt_link(&udp, None);

        udp.inbound.push(InboundMessage::new(InterfaceKind::Udp, "drone1", position_envelope(3)));
        assert_eq!(link.receive().len(), 1);

        session.inbound.push(MqttInbound {
            topic: "/hivelink/v1/to/drone2/Command/AP/TAKEOFF".to_string(),
            payload: serde_json::to_vec(&json!({ "data": { "alt_m": 30 }, "from": "drone1" }))
                .expect("json"),
        });
        link.receive();
        assert!(link.presence().is_incumbent_local("drone1"));
        assert_eq!(
            link.presence().get("drone1").expect("record").intf,
            InterfaceKind::Udp
        );

        session.inbound.push(takeoff_command("drone1"));
        link.receive();
        let sent = udp.sent.lock().expect("sent");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_deref(), Some("drone1"));
    }

    #[test]
    fn mqtt_command_falls_back_to_multicast() {
        let udp = FakeAdapter::failing(InterfaceKind::Udp);
        let multicast = FakeAdapter::new(InterfaceKind::Multicast);
        let (link, session) = mqtt_link(&udp, Some(&multicast));

        link.update_presence("drone2", InterfaceKind::Multicast, LinkQuality::default(), None);
        session.inbound.push(takeoff_command("drone2"));
        link.receive();

        let sent = multicast.sent.lock().expect("sent");
        assert_eq!(sent.len(), 1);
        let frame = decode_frame(&sent[0].0).expect("frame");
        assert!(frame.is_broadcast());
    }

    #[test]
    fn start_twice_is_rejected_and_stop_publishes_offline() {
        let udp = FakeAdapter::new(InterfaceKind::Udp);
        let (mut link, session) = mqtt_link(&udp, None);
        assert_eq!(link.state(), LinkState::Running);
        assert!(matches!(link.start(), Err(DatalinkError::Config(ConfigError::AlreadyRunning))));

        link.stop();
        assert_eq!(link.state(), LinkState::Stopped);
        assert!(session.disconnected.load(Ordering::Relaxed));
        let published = session.published.lock().expect("published");
        assert_eq!(published.last().expect("offline").payload, b"offline");

        link.stop();
    }

    #[test]
    fn failed_start_rolls_back() {
        struct Broken;
        impl Adapter for Broken {
            fn kind(&self) -> InterfaceKind {
                InterfaceKind::Meshtastic
            }
            fn start(&mut self) -> Result<(), TransportError> {
                Err(TransportError::RadioUnavailable("unplugged".to_string()))
            }
            fn stop(&mut self) {}
            fn try_send(&self, _: &[u8], _: Option<&str>) -> Result<(), TransportError> {
                Err(TransportError::NotStarted)
            }
            fn poll_receive(&self) -> Vec<InboundMessage> {
                Vec::new()
            }
        }

        let mut link = DatalinkInterface::with_adapters(
            "gcs1",
            nodes(),
            Adapters {
                udp: Some(Box::new(FakeAdapter::new(InterfaceKind::Udp))),
                mesh: Some(Box::new(Broken)),
                ..Adapters::default()
            },
            Duration::from_secs(600),
        );
        assert!(matches!(
            link.start(),
            Err(DatalinkError::Transport { iface: "meshtastic", .. })
        ));
        assert_eq!(link.state(), LinkState::Stopped);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let schema = Arc::new(builtin::schema().expect("schema"));
        let config = DatalinkConfig::new("gcs1");
        assert!(matches!(
            DatalinkInterface::new(&config, schema),
            Err(ConfigError::NoTransport)
        ));
    }
}
