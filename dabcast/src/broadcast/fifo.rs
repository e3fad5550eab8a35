use crate::broadcast::backpressure::Backpressure;
use crate::broadcast::uniform_reliable::UniformReliable;
use crate::configuration::BackpressurePolicy;
use crate::identity::{Interner, MessageId};
use crate::sink::{Event, Sink};
use crate::wire::{FifoEnvelope, UrbEnvelope};
use bytes::Bytes;
use mepa::Shutdown;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// The delivery state of a single source process.
#[derive(Default)]
struct Source {
    // Next sequence number to deliver, everything below it was delivered.
    next: i32,
    // Arrived ahead of their turn.
    pending: HashMap<i32, MessageId>,
}

/// Uniform FIFO broadcast.
///
/// Every message carries a sequence number assigned by its origin. Messages from one origin are
/// delivered in sequence order with no gaps, whatever order the uniform reliable broadcast hands
/// them over.
pub struct UniformFifo {
    urb: UniformReliable,
    interner: Arc<Interner>,
    sink: Arc<dyn Sink>,
    sequence: AtomicI32,

    // One lock per source, deliveries from different sources never contend.
    sources: Vec<Mutex<Source>>,
    backpressure: Backpressure,
    shutdown: Shutdown,
}

impl UniformFifo {
    pub fn new(
        urb: UniformReliable,
        interner: Arc<Interner>,
        sink: Arc<dyn Sink>,
        policy: BackpressurePolicy,
        shutdown: Shutdown,
    ) -> Self {
        let sources = (0..urb.processes()).map(|_| Mutex::default()).collect();
        UniformFifo {
            urb,
            interner,
            sink,
            sequence: AtomicI32::new(0),
            sources,
            backpressure: Backpressure::new(policy),
            shutdown,
        }
    }

    /// Broadcast the payload with the next local sequence number.
    ///
    /// Waits while too many local messages are still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Stopped`] if the stack stops while waiting, the payload is then
    /// never broadcast.
    pub async fn broadcast(&self, payload: i32) -> crate::Result<()> {
        self.backpressure.admit(&self.shutdown).await?;

        let envelope = FifoEnvelope {
            origin: self.urb.local(),
            seq: self.sequence.fetch_add(1, Ordering::AcqRel),
            payload,
        }
        .encode();
        self.interner.assign_id(&envelope);
        self.sink.record(Event::Broadcast { payload });

        if let Some(message) = self.urb.broadcast(envelope) {
            self.handle(message);
        }
        Ok(())
    }

    /// Handle a datagram received from the network.
    pub fn deliver(&self, datagram: &Bytes) {
        if let Some(message) = self.urb.deliver(datagram) {
            self.handle(message);
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.backpressure.in_flight()
    }

    fn handle(&self, message: UrbEnvelope) {
        let envelope = match FifoEnvelope::decode(&message.payload) {
            Ok(envelope) if envelope.origin == message.origin => envelope,
            Ok(envelope) => {
                tracing::debug!(
                    origin = message.origin,
                    claimed = envelope.origin,
                    "dropping message with mismatched origin"
                );
                return;
            }
            Err(e) => {
                tracing::debug!(origin = message.origin, error = %e, "dropping fifo frame");
                return;
            }
        };

        let source = match self.sources.get(usize::from(envelope.origin)) {
            Some(source) => source,
            None => {
                tracing::debug!(origin = envelope.origin, "dropping message from unknown origin");
                return;
            }
        };
        let id = self.interner.assign_id(&message.payload);

        let mut guard = source.lock();
        let source = &mut *guard;
        if envelope.seq < source.next {
            tracing::debug!(origin = envelope.origin, seq = envelope.seq, "already delivered");
            return;
        }
        source.pending.insert(envelope.seq, id);

        while let Some(id) = source.pending.remove(&source.next) {
            match self.interner.get_value(id).map(|v| FifoEnvelope::decode(&v)) {
                Some(Ok(ready)) => self.sink.record(Event::Deliver {
                    origin: ready.origin,
                    payload: ready.payload,
                }),
                _ => tracing::warn!(message = %id, "pending message vanished"),
            }
            source.next += 1;

            if envelope.origin == self.urb.local() {
                self.backpressure.delivered();
            }
        }
    }
}
