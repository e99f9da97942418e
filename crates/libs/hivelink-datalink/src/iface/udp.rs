use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hivelink_proto::decode_frame;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::inbox::Inbox;
use crate::node::NodeTable;

use super::{runtime, Adapter, InboundMessage, InterfaceKind, DATAGRAM_BUFFER_SIZE};

/// Unicast UDP. Destinations resolve through the node table.
pub struct UdpAdapter {
    bind_addr: SocketAddr,
    nodes: Arc<NodeTable>,
    socket: Option<Arc<UdpSocket>>,
    mailbox: Arc<Inbox<InboundMessage>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UdpAdapter {
    pub fn new(bind_addr: SocketAddr, nodes: Arc<NodeTable>) -> Self {
        Self {
            bind_addr,
            nodes,
            socket: None,
            mailbox: Arc::new(Inbox::new()),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Bound address once started; useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    fn bind(&self) -> io::Result<std::net::UdpSocket> {
        let domain = if self.bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&self.bind_addr.into())?;
        Ok(socket.into())
    }
}

impl Adapter for UdpAdapter {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Udp
    }

    fn start(&mut self) -> Result<(), TransportError> {
        let handle = runtime()?;
        let std_socket = self.bind()?;
        let socket = {
            let _guard = handle.enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };
        log::info!("udp_interface: bound addr={}", socket.local_addr()?);

        self.cancel = CancellationToken::new();
        self.task = Some(spawn_listener(
            &handle,
            InterfaceKind::Udp,
            socket.clone(),
            self.mailbox.clone(),
            self.cancel.clone(),
        ));
        self.socket = Some(socket);
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.task.take();
        if self.socket.take().is_some() {
            log::info!("udp_interface: closed addr={}", self.bind_addr);
        }
    }

    fn try_send(&self, frame: &[u8], destination: Option<&str>) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotStarted)?;
        let destination = destination.unwrap_or_default();
        let addr = self
            .nodes
            .ip_of(destination)
            .ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))?;

        match socket.try_send_to(frame, addr) {
            Ok(_) => {
                log::trace!("udp_interface: tx dest={destination} addr={addr} len={}", frame.len());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(TransportError::QueueFull),
            Err(err) => Err(err.into()),
        }
    }

    fn poll_receive(&self) -> Vec<InboundMessage> {
        self.mailbox.drain()
    }
}

impl Drop for UdpAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Receive loop shared by the unicast and multicast adapters: unframes each
/// datagram and queues its payload, discarding anything that fails to decode.
pub(crate) fn spawn_listener(
    handle: &tokio::runtime::Handle,
    kind: InterfaceKind,
    socket: Arc<UdpSocket>,
    mailbox: Arc<Inbox<InboundMessage>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut rx_buffer = [0u8; DATAGRAM_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = socket.recv_from(&mut rx_buffer) => match result {
                    Ok((n, peer)) => match decode_frame(&rx_buffer[..n]) {
                        Ok(frame) if frame.payload.is_empty() => {
                            log::debug!("{kind}_interface: empty payload from={}", frame.source);
                        }
                        Ok(frame) => {
                            log::trace!(
                                "{kind}_interface: rx from={} peer={peer} len={}",
                                frame.source,
                                frame.payload.len()
                            );
                            mailbox.push(InboundMessage::new(kind, frame.source, frame.payload));
                        }
                        Err(err) => {
                            log::warn!("{kind}_interface: discarded frame peer={peer} err={err}");
                        }
                    },
                    Err(err) => {
                        log::warn!("{kind}_interface: receive error {err}");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
            }
        }
        log::debug!("{kind}_interface: listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hivelink_proto::encode_frame;

    use super::*;
    use crate::node::NodeRecord;

    async fn wait_for(adapter: &UdpAdapter) -> Vec<InboundMessage> {
        for _ in 0..100 {
            let messages = adapter.poll_receive();
            if !messages.is_empty() {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn loopback_delivery_between_two_adapters() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let mut receiver = UdpAdapter::new(localhost, Arc::new(NodeTable::default()));
        receiver.start().expect("start receiver");
        let receiver_addr = receiver.local_addr().expect("bound");

        let nodes = NodeTable::new([NodeRecord {
            name: "b".to_string(),
            mesh_id: None,
            ip: Some(receiver_addr),
        }]);
        let mut sender = UdpAdapter::new(localhost, Arc::new(nodes));
        sender.start().expect("start sender");

        let frame = encode_frame("a", Some("b"), b"payload").expect("frame");
        sender.try_send(&frame, Some("b")).expect("send");

        let received = wait_for(&receiver).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].from, "a");
        assert_eq!(received[0].intf, InterfaceKind::Udp);
        assert_eq!(received[0].data, b"payload");
        assert!(receiver.poll_receive().is_empty());

        sender.stop();
        receiver.stop();
    }

    #[tokio::test]
    async fn corrupt_datagrams_are_dropped() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let mut receiver = UdpAdapter::new(localhost, Arc::new(NodeTable::default()));
        receiver.start().expect("start");
        let addr = receiver.local_addr().expect("bound");

        let raw = tokio::net::UdpSocket::bind(localhost).await.expect("bind");
        let mut corrupt = encode_frame("a", None, b"one").expect("frame");
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;
        raw.send_to(&corrupt, addr).await.expect("send corrupt");
        raw.send_to(b"not msgpack at all", addr).await.expect("send junk");
        raw.send_to(&encode_frame("a", None, b"two").expect("frame"), addr)
            .await
            .expect("send good");

        let received = wait_for(&receiver).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data, b"two");
        receiver.stop();
    }

    #[tokio::test]
    async fn unknown_destination_is_a_send_failure() {
        let localhost: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let mut adapter = UdpAdapter::new(localhost, Arc::new(NodeTable::default()));
        adapter.start().expect("start");
        let frame = encode_frame("a", Some("ghost"), b"x").expect("frame");
        assert!(matches!(
            adapter.try_send(&frame, Some("ghost")),
            Err(TransportError::UnknownDestination(dest)) if dest == "ghost"
        ));
        adapter.stop();
    }

    #[test]
    fn send_before_start_fails() {
        let adapter =
            UdpAdapter::new("127.0.0.1:0".parse().expect("addr"), Arc::new(NodeTable::default()));
        assert!(matches!(adapter.try_send(b"x", Some("b")), Err(TransportError::NotStarted)));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let mut adapter =
            UdpAdapter::new("127.0.0.1:0".parse().expect("addr"), Arc::new(NodeTable::default()));
        assert!(matches!(adapter.start(), Err(TransportError::NoRuntime)));
    }
}
