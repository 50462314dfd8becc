//! UDP peer binding for the demo server.
//!
//! One non-blocking socket is shared by every peer; a peer is just an
//! address. The demo targets LAN links, so the reliable channel is plain
//! UDP too and loss recovery is left to the engine's re-baseline path.

use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;

use syncline::{DeliveryMethod, PeerTransport};

pub struct UdpPeer {
    socket: Rc<UdpSocket>,
    addr: SocketAddr,
}

impl UdpPeer {
    pub fn new(socket: Rc<UdpSocket>, addr: SocketAddr) -> Self {
        Self { socket, addr }
    }
}

impl PeerTransport for UdpPeer {
    fn send(&mut self, data: &[u8], _delivery: DeliveryMethod) {
        if let Err(err) = self.socket.send_to(data, self.addr) {
            log::warn!("send to {} failed: {}", self.addr, err);
        }
    }

    fn max_single_packet_size(&self, _delivery: DeliveryMethod) -> usize {
        // Conservative internet-safe UDP payload.
        1200
    }
}
