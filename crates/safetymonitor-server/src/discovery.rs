//! Alpaca UDP discovery responder.
//!
//! Listens on the discovery port and answers `alpacadiscovery1` with the
//! HTTP port, both directly to the sender and as a broadcast on the
//! sender's port. Everything else is dropped without a reply.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use safetymonitor_protocol::{encode_discovery_response, is_discovery_request};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest datagram we bother reading.
const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Configuration for the discovery responder.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Address to listen on, usually `0.0.0.0:32227`.
    pub bind_addr: SocketAddr,
    /// HTTP port advertised in replies.
    pub http_port: u16,
}

/// A bound discovery responder.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    http_port: u16,
}

impl DiscoveryResponder {
    /// Bind the discovery socket with address reuse and broadcast enabled.
    pub fn bind(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let addr = config.bind_addr;
        let socket = open_socket(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;

        info!(addr = %socket.local_addr().unwrap_or(addr), "Alpaca discovery listening");
        Ok(Self {
            socket,
            http_port: config.http_port,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Answer requests until `cancel` fires. Dropping the responder closes the socket.
    pub async fn run(self, cancel: CancellationToken) {
        let reply = encode_discovery_response(self.http_port);
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Discovery receive failed");
                    continue;
                }
            };

            if !is_discovery_request(&buf[..len]) {
                continue;
            }

            debug!(peer = %peer, "Discovery request");
            self.send_reply(&reply, peer).await;

            if peer.is_ipv4() {
                let broadcast = SocketAddrV4::new(Ipv4Addr::BROADCAST, peer.port());
                self.send_reply(&reply, broadcast.into()).await;
            }
        }

        info!("Alpaca discovery stopped");
    }

    /// Send one reply datagram; failures are logged and reported as `false`.
    async fn send_reply(&self, reply: &[u8], to: SocketAddr) -> bool {
        match self.socket.send_to(reply, to).await {
            Ok(_) => true,
            Err(e) => {
                error!(to = %to, error = %e, "Discovery reply failed");
                false
            }
        }
    }
}

fn open_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}
