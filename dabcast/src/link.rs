//! The perfect link between the local process and one foreign process.
//!
//! A message is transmitted again every interval until the foreign process acknowledges it, so
//! it eventually arrives as long as both processes are correct. On the receiving side every data
//! envelope is acknowledged, duplicates included, and only the first copy is handed upward.
//!
//! The resend loop never blocks a worker, each transmission schedules the next one on the
//! [`Scheduler`] and the loop ends the first time it finds the message acknowledged.
use crate::executor::Scheduler;
use crate::identity::{Interner, MessageId};
use crate::process::{ProcessDescriptor, ProcessId};
use crate::transport::Transport;
use crate::wire::LinkEnvelope;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub struct PerfectLink {
    local: ProcessId,
    foreign: ProcessDescriptor,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    interner: Arc<Interner>,
    interval: Duration,

    // Outgoing envelopes waiting for the acknowledgement.
    undelivered: RwLock<HashSet<MessageId>>,

    // Incoming payloads already handed upward.
    delivered: RwLock<HashSet<MessageId>>,
}

impl PerfectLink {
    pub fn new(
        local: ProcessId,
        foreign: ProcessDescriptor,
        transport: Arc<dyn Transport>,
        scheduler: Scheduler,
        interner: Arc<Interner>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(PerfectLink {
            local,
            foreign,
            transport,
            scheduler,
            interner,
            interval,
            undelivered: RwLock::new(HashSet::new()),
            delivered: RwLock::new(HashSet::new()),
        })
    }

    pub fn foreign(&self) -> &ProcessDescriptor {
        &self.foreign
    }

    /// Send the payload until the foreign process acknowledges it.
    ///
    /// Returns the identifier of the outgoing envelope.
    pub fn send_message(self: &Arc<Self>, payload: Bytes) -> MessageId {
        let envelope = LinkEnvelope::data(self.local, payload).encode();
        let id = self.interner.assign_id(&envelope);
        self.undelivered.write().insert(id);
        self.retransmit(id);
        id
    }

    fn retransmit(self: &Arc<Self>, id: MessageId) {
        if !self.undelivered.read().contains(&id) {
            return;
        }

        match self.interner.get_value(id) {
            Some(envelope) => self.transmit(&envelope),
            None => {
                tracing::warn!(message = %id, "retransmitting unknown message");
                return;
            }
        }

        let link = Arc::clone(self);
        self.scheduler
            .schedule(self.interval, move || link.retransmit(id));
    }

    fn transmit(&self, data: &[u8]) {
        match self.transport.send(data, self.foreign.address()) {
            Ok(()) => {}
            Err(crate::Error::Transport(e)) if e.is_transient() => {
                tracing::debug!(process = self.foreign.id(), error = %e, "send failed, will retry");
            }
            Err(e) => {
                tracing::warn!(process = self.foreign.id(), error = %e, "send failed");
            }
        }
    }

    /// Handle an envelope the foreign process sent.
    ///
    /// Returns `true` only the first time a data envelope carries this payload. Acknowledgements
    /// and duplicates return `false`.
    pub fn recv_message(&self, envelope: &LinkEnvelope) -> bool {
        if envelope.ack {
            let original = envelope.acknowledged(self.local).encode();
            if let Some(id) = self.interner.get_id(&original) {
                self.undelivered.write().remove(&id);
            }
            return false;
        }

        self.transmit(&envelope.acknowledgement(self.local).encode());

        let id = self.interner.assign_id(&envelope.payload);
        if self.delivered.read().contains(&id) {
            return false;
        }
        // Two copies can pass the read check concurrently, only one of them inserts.
        self.delivered.write().insert(id)
    }

    /// Verify if the outgoing envelope is still waiting for the acknowledgement.
    pub fn is_pending(&self, id: MessageId) -> bool {
        self.undelivered.read().contains(&id)
    }

    /// The number of outgoing envelopes waiting for the acknowledgement.
    pub fn pending(&self) -> usize {
        self.undelivered.read().len()
    }
}
