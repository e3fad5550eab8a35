//! A minimal project that offers a datagram transport primitive backed by UDP.
//!
//! The main purpose of this project is to abstract the socket handling and offer a small
//! communication primitive to the broadcast stack built on top of it. The transport is
//! deliberately unreliable: datagrams can be lost, duplicated or reordered, and every guarantee
//! is built by the upper layers through retransmission and acknowledgements.
//!
//! The project is organized around a single bound socket shared by both halves of the transport.
//!
//! ```text
//!             +---------------+                 +-------------------+
//!             |               |                 |                   |
//!             |   Receiver    |<----Datagram----+   DatagramSocket  |
//!             |               |                 |                   |
//!             +------+--------+                 +---------+---------+
//!                    |                                    ^
//!                 Callback                                |
//!                    |          +------------+          Send
//!                    v          |            |            |
//!               upper layer --->|   Sender   +------------+
//!                               |            |
//!                               +------------+
//! ```
//!
//! The [`Receiver`] polls the socket with a receive timeout, a timeout is not an error and only
//! gives the loop a chance to observe the [`Shutdown`] signal. The [`Sender`] never blocks, if the
//! socket is not writable right away the send fails with [`Error::WouldBlock`] and the caller is
//! expected to retry later, which is what a retransmission loop does anyway.
//!
//! We use [`tokio`] all around, along with [`bytes`] to hand received datagrams upward without
//! copying them again.

pub use crate::shutdown::{Shutdown, Signal};
pub use crate::transport::{channel, Receiver, Sender};
mod datagram;
mod shutdown;
mod transport;

/// Largest datagram accepted by the receiver, the UDP payload limit.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// The possible errors that can occur when using the current library. Each error will be
/// associated with a description so the user can known what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not possible to bind the local socket.
    #[error("failed binding {address}: {source}")]
    Bind {
        address: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// The socket is not writable right now, the operation should be retried.
    #[error("socket would block")]
    WouldBlock,

    /// Any other error reported by the socket.
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    /// The transport was already stopped.
    #[error("transport stopped")]
    Stopped,
}

impl Error {
    /// Transient errors are expected to go away by retrying the same operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::SocketError(..))
    }
}

/// A convenience type that will be used in all operations for the current library.
pub type Result<T> = std::result::Result<T, Error>;
