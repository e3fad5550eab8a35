use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Represent the bound UDP socket.
///
/// Differently from a TCP connection, a single socket is used to both read and write, so the
/// structure is shared between the [`crate::Sender`] and the [`crate::Receiver`]. Only the
/// reading side keeps a buffer, writes go straight to the socket.
#[derive(Debug)]
pub(crate) struct DatagramSocket {
    socket: UdpSocket,
}

/// The reading half state, owned by the receiver only.
#[derive(Debug)]
pub(crate) struct DatagramReader {
    // Used to read datagrams from the socket. Each received datagram is copied out, so the buffer
    // is allocated once and a held datagram only keeps its own bytes alive.
    buffer: Box<[u8]>,

    // How long a single read waits for a datagram before giving up.
    timeout: Duration,
}

impl DatagramSocket {
    /// Binds a new socket at the given address.
    pub(crate) async fn bind(address: SocketAddr) -> crate::Result<Self> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| crate::Error::Bind { address, source })?;
        Ok(DatagramSocket { socket })
    }

    pub(crate) fn local_address(&self) -> crate::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Write the data to the destination as a single datagram.
    ///
    /// This never waits for the socket to become writable. When the kernel buffer is full the
    /// datagram is not sent and [`crate::Error::WouldBlock`] is returned instead.
    ///
    /// # Errors
    ///
    /// This can fail for any I/O error reported by the socket, or if only part of the data was
    /// written.
    pub(crate) fn write(&self, data: &[u8], destination: SocketAddr) -> crate::Result<()> {
        match self.socket.try_send_to(data, destination) {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => Err(crate::Error::SocketError(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("partial datagram written, {} of {} bytes", n, data.len()),
            ))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(crate::Error::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }
}

impl DatagramReader {
    pub(crate) fn new(timeout: Duration) -> Self {
        DatagramReader {
            buffer: vec![0; crate::MAX_DATAGRAM].into_boxed_slice(),
            timeout,
        }
    }

    /// Read a single datagram from the socket.
    ///
    /// Returns `None` if nothing arrived before the timeout elapsed, which is not an error, the
    /// caller only tries again.
    ///
    /// # Errors
    ///
    /// Any I/O error reported by the socket while receiving.
    pub(crate) async fn read(
        &mut self,
        socket: &DatagramSocket,
    ) -> crate::Result<Option<(Bytes, SocketAddr)>> {
        let received =
            tokio::time::timeout(self.timeout, socket.socket.recv_from(&mut self.buffer[..])).await;
        match received {
            Err(..) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok((n, source))) => {
                let data = Bytes::copy_from_slice(&self.buffer[..n]);
                Ok(Some((data, source)))
            }
        }
    }
}
