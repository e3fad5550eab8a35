use std::net::SocketAddr;

/// The sending half of an unreliable datagram transport.
///
/// The stack only ever writes whole datagrams to an address, the receiving half is driven from the
/// outside and feeds [`crate::Inbound`]. A send may silently lose the datagram, every guarantee is
/// rebuilt by the perfect link retransmissions. An error means the datagram surely did not leave
/// and is treated as transient by the callers.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, data: &[u8], destination: SocketAddr) -> crate::Result<()>;
}

impl Transport for mepa::Sender {
    fn send(&self, data: &[u8], destination: SocketAddr) -> crate::Result<()> {
        Ok(mepa::Sender::send(self, data, destination)?)
    }
}
