//! A layered broadcast stack over an unreliable datagram transport.
//!
//! Every process in a static group broadcasts a bounded sequence of integer payloads, and every
//! correct process delivers them under an ordering and agreement guarantee, even though the
//! underlying UDP transport loses, duplicates and reorders datagrams. The stack is built bottom
//! up, each layer wrapping the payload of the layer above with its own envelope:
//!
//! ```text
//!   application
//!       |  broadcast(payload)                 ^ d <origin> <payload>
//!       v                                     |
//!   +-----------------------------+-----------------------------+
//!   |   UniformFifo               |   LocalizedCausal           |
//!   +-----------------------------+-----------------------------+
//!   |              UniformReliable (majority quorum)            |
//!   +-----------------------------------------------------------+
//!   |     PerfectLink x (N - 1)   (retransmit until acked)      |
//!   +-----------------------------------------------------------+
//!   |                   mepa (UDP datagrams)                    |
//!   +-----------------------------------------------------------+
//! ```
//!
//! Message bytes are interned once by the [`Interner`], every layer afterwards works with the
//! small [`MessageId`] handle, which is what the retransmission and delivery jobs capture.
//!
//! Work is executed by two pools, an [`Executor`] for inbound deliveries and a [`Scheduler`] for
//! delayed retransmissions. No worker ever blocks waiting for the network: a retransmission waits
//! by scheduling itself again. Ordering comes from the data structures of each layer, never from
//! the execution order of the workers.
//!
//! The [`Stack`] ties everything together for a single process, and the `dabcast` binary drives a
//! [`Stack`] from the command line.
pub mod broadcast;
pub mod configuration;
pub mod executor;
pub mod identity;
pub mod link;
pub mod membership;
pub mod process;
pub mod sink;
pub mod stack;
pub mod transport;
pub mod wire;

pub use configuration::{BackpressurePolicy, StackConfiguration};
pub use executor::{Executor, Scheduler};
pub use identity::{Interner, MessageId};
pub use membership::{Membership, Mode};
pub use process::{ProcessDescriptor, ProcessId};
pub use sink::{Event, FileSink, MemorySink, Sink};
pub use stack::{Inbound, Stack};
pub use transport::Transport;
pub use wire::FrameError;

/// The possible errors that can occur when building or driving the stack.
///
/// The protocol layers themselves never fail a delivery with an error, a bad frame is logged and
/// dropped. These variants surface from construction, parsing and the process driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] mepa::Error),

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("membership: {0}")]
    Membership(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;
