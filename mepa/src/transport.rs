use crate::datagram::{DatagramReader, DatagramSocket};
use crate::shutdown::Shutdown;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How long the receiver waits for a datagram before checking for the shutdown again.
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// This is the structure used to receive messages from other peers. This structure is used
/// basically to read from the bound socket and hand every datagram to a callback. Since a socket
/// is used only a single instance will exists.
#[derive(Debug)]
pub struct Receiver {
    // The socket shared with the sender half.
    socket: Arc<DatagramSocket>,

    // The reading state, holding the buffer and the timeout.
    reader: DatagramReader,
}

/// This is the structure used to send messages to other peers. The structure is cheap to clone,
/// every clone writes to the same underlying socket, so acknowledgements leave from the same port
/// the data arrives.
#[derive(Debug, Clone)]
pub struct Sender {
    socket: Arc<DatagramSocket>,
}

/// This is used to create the tuple of a [`Sender`] and a [`Receiver`].
///
/// The argument is the address in which the socket will bind. Using port 0 lets the system pick
/// an available port, which can be read back from [`Receiver::local_address`].
///
/// Note that the socket is bound right after this method is called, datagrams arriving before
/// the [`Receiver::poll`] starts are buffered by the operating system and may be dropped if the
/// buffer fills, which is acceptable for an unreliable transport.
///
/// # Examples
///
/// ```
/// use mepa::channel;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = channel("127.0.0.1:0".parse().unwrap()).await;
/// #    assert!(transport.is_ok());
///     let (tx, rx) = transport.unwrap();
///     // rx.poll...
///     // tx.send...
/// }
/// ```
///
/// # Errors
///
/// This method will fail if is not possible to bind to the address given as argument.
pub async fn channel(address: SocketAddr) -> crate::Result<(Sender, Receiver)> {
    let socket = Arc::new(DatagramSocket::bind(address).await?);
    tracing::info!(address = %socket.local_address()?, "bound datagram socket");

    let sender = Sender {
        socket: Arc::clone(&socket),
    };
    let receiver = Receiver {
        socket,
        reader: DatagramReader::new(DEFAULT_RECEIVE_TIMEOUT),
    };
    Ok((sender, receiver))
}

impl Receiver {
    /// Change how long a single read waits before checking for the shutdown.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.reader = DatagramReader::new(timeout);
        self
    }

    /// Start polling, publishing every received datagram to the given callback.
    ///
    /// This method will only return after the shutdown is received. The callback is invoked
    /// inline, so it should only hand the data over and return quickly.
    ///
    /// # Errors
    ///
    /// Receive errors are not returned, they are logged and the loop continues, a single bad read
    /// should not take the process down. This only returns an error if the transport was already
    /// shutdown before polling started.
    pub async fn poll<F>(&mut self, mut shutdown: Shutdown, mut f: F) -> crate::Result<()>
    where
        F: FnMut(Bytes, SocketAddr),
    {
        if shutdown.is_shut() {
            return Err(crate::Error::Stopped);
        }

        while !shutdown.is_shut() {
            let received = tokio::select! {
                res = self.reader.read(&self.socket) => res,
                _ = shutdown.wait_shutdown() => break,
            };

            match received {
                Ok(Some((data, source))) => f(data, source),
                Ok(None) => tracing::trace!("receive timeout"),
                Err(e) => tracing::warn!(error = %e, "failed receiving datagram"),
            }
        }

        tracing::info!("stopped polling datagrams");
        Ok(())
    }

    pub fn local_address(&self) -> crate::Result<SocketAddr> {
        self.socket.local_address()
    }
}

impl Sender {
    /// Used to send a datagram to another address.
    ///
    /// # Errors
    ///
    /// This fails with [`crate::Error::WouldBlock`] when the socket can not take the datagram
    /// right now, and with [`crate::Error::SocketError`] for any other socket failure. Both are
    /// transient from the perspective of a retransmitting caller.
    pub fn send(&self, data: &[u8], destination: SocketAddr) -> crate::Result<()> {
        self.socket.write(data, destination)
    }

    pub fn local_address(&self) -> crate::Result<SocketAddr> {
        self.socket.local_address()
    }
}
