use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::inbox::Inbox;

use super::udp::spawn_listener;
use super::{runtime, Adapter, InboundMessage, InterfaceKind};

/// Hop limit for outgoing multicast; keeps traffic on the local segment.
pub const MULTICAST_TTL: u32 = 2;

/// UDP multicast on one group. Every send goes to the whole group.
pub struct MulticastAdapter {
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
    recv_socket: Option<Arc<UdpSocket>>,
    send_socket: Option<std::net::UdpSocket>,
    mailbox: Arc<Inbox<InboundMessage>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MulticastAdapter {
    /// `interface` is the local address used both to join the group and as
    /// the outgoing multicast interface.
    pub fn new(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Self {
        Self {
            group,
            port,
            interface,
            recv_socket: None,
            send_socket: None,
            mailbox: Arc::new(Inbox::new()),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }

    fn open_receiver(&self) -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        socket.bind(&bind_addr.into())?;
        socket.set_multicast_if_v4(&self.interface)?;
        socket.join_multicast_v4(&self.group, &self.interface)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    fn open_sender(&self) -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_multicast_if_v4(&self.interface)?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }
}

impl Adapter for MulticastAdapter {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Multicast
    }

    fn start(&mut self) -> Result<(), TransportError> {
        let handle = runtime()?;
        let receiver = self.open_receiver()?;
        let sender = self.open_sender()?;
        let receiver = {
            let _guard = handle.enter();
            Arc::new(UdpSocket::from_std(receiver)?)
        };
        log::info!(
            "multicast_interface: joined group={} port={} iface={}",
            self.group,
            self.port,
            self.interface
        );

        self.cancel = CancellationToken::new();
        self.task = Some(spawn_listener(
            &handle,
            InterfaceKind::Multicast,
            receiver.clone(),
            self.mailbox.clone(),
            self.cancel.clone(),
        ));
        self.recv_socket = Some(receiver);
        self.send_socket = Some(sender);
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.task.take();
        self.send_socket.take();
        if let Some(socket) = self.recv_socket.take() {
            if let Err(err) = socket.leave_multicast_v4(self.group, self.interface) {
                log::debug!("multicast_interface: leave group failed err={err}");
            }
            log::info!("multicast_interface: closed group={}", self.group);
        }
    }

    fn try_send(&self, frame: &[u8], _destination: Option<&str>) -> Result<(), TransportError> {
        let socket = self.send_socket.as_ref().ok_or(TransportError::NotStarted)?;
        match socket.send_to(frame, self.group_addr()) {
            Ok(_) => {
                log::trace!("multicast_interface: tx group={} len={}", self.group, frame.len());
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

impl Drop for MulticastAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
