//! The broadcast layers on top of the perfect links.
//!
//! [`UniformReliable`] gives agreement, every message delivered by some process is eventually
//! delivered by every correct process. Exactly one ordering layer sits on top of it:
//!
//! * [`UniformFifo`]: messages from the same origin are delivered in the order they were broadcast.
//! * [`LocalizedCausal`]: a message is delivered only after the messages its origin had delivered
//!   from the processes it depends on.
pub(crate) mod backpressure;
pub mod fifo;
pub mod localized_causal;
pub mod uniform_reliable;

pub use fifo::UniformFifo;
pub use localized_causal::LocalizedCausal;
pub use uniform_reliable::UniformReliable;

use bytes::Bytes;

/// The ordering layer selected by the membership.
pub enum Broadcast {
    Fifo(UniformFifo),
    Causal(LocalizedCausal),
}

impl Broadcast {
    /// Broadcast the application payload, waiting for the backpressure if needed.
    pub async fn broadcast(&self, payload: i32) -> crate::Result<()> {
        match self {
            Broadcast::Fifo(fifo) => fifo.broadcast(payload).await,
            Broadcast::Causal(causal) => causal.broadcast(payload).await,
        }
    }

    /// Hand a datagram received from the network to the whole stack.
    pub fn deliver(&self, datagram: &Bytes) {
        match self {
            Broadcast::Fifo(fifo) => fifo.deliver(datagram),
            Broadcast::Causal(causal) => causal.deliver(datagram),
        }
    }

    /// Local messages broadcast but not delivered back yet.
    pub fn in_flight(&self) -> u64 {
        match self {
            Broadcast::Fifo(fifo) => fifo.in_flight(),
            Broadcast::Causal(causal) => causal.in_flight(),
        }
    }
}
