use crate::identity::{Interner, MessageId};
use crate::link::PerfectLink;
use crate::process::ProcessId;
use crate::wire::{LinkEnvelope, UrbEnvelope};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Tracks which processes are known to hold each message.
///
/// The presence of a message in `received` also means the message was already relayed, or is
/// being relayed right now.
#[derive(Default)]
struct Holders {
    received: HashMap<MessageId, HashSet<ProcessId>>,
    delivered: HashSet<MessageId>,
}

impl Holders {
    /// Register the process as a holder, returns the number of known holders.
    fn hold(&mut self, message: MessageId, by: ProcessId) -> usize {
        let holders = self.received.entry(message).or_default();
        holders.insert(by);
        holders.len()
    }
}

/// Uniform reliable broadcast over one perfect link per foreign process.
///
/// A message is delivered once more than half of the group is known to hold it. A process relays
/// a message the first time it sees one, before counting itself as a holder, so any message
/// delivered anywhere was already relayed by a majority and every correct process eventually
/// receives it.
pub struct UniformReliable {
    local: ProcessId,
    processes: usize,

    // Indexed by process identifier, `None` at the local process.
    links: Vec<Option<Arc<PerfectLink>>>,
    interner: Arc<Interner>,
    holders: Mutex<Holders>,
}

impl UniformReliable {
    /// Creates the broadcast for a group of `processes` members.
    ///
    /// Links to processes outside of the group are ignored.
    pub fn new(
        local: ProcessId,
        processes: usize,
        links: Vec<Arc<PerfectLink>>,
        interner: Arc<Interner>,
    ) -> Self {
        let mut indexed: Vec<Option<Arc<PerfectLink>>> = vec![None; processes];
        for link in links {
            let id = usize::from(link.foreign().id());
            match indexed.get_mut(id) {
                Some(slot) if id != usize::from(local) => *slot = Some(link),
                _ => tracing::warn!(process = id, "ignoring link outside of the group"),
            }
        }

        UniformReliable {
            local,
            processes,
            links: indexed,
            interner,
            holders: Mutex::new(Holders::default()),
        }
    }

    pub fn local(&self) -> ProcessId {
        self.local
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    fn has_quorum(&self, holders: usize) -> bool {
        holders * 2 > self.processes
    }

    /// Broadcast the payload to every other process.
    ///
    /// The local process is a holder right away. In a group of a single process that is already
    /// a majority, and the message is returned as delivered.
    pub fn broadcast(&self, payload: Bytes) -> Option<UrbEnvelope> {
        let envelope = UrbEnvelope {
            origin: self.local,
            payload,
        };
        let encoded = envelope.encode();
        let id = self.interner.assign_id(&encoded);

        let delivered = {
            let mut holders = self.holders.lock();
            let count = holders.hold(id, self.local);
            self.has_quorum(count) && holders.delivered.insert(id)
        };

        self.relay(encoded);
        delivered.then_some(envelope)
    }

    fn relay(&self, encoded: Bytes) {
        for link in self.links.iter().flatten() {
            link.send_message(encoded.clone());
        }
    }

    /// Handle a datagram received from the network.
    ///
    /// Returns the message the first time it reaches a majority of holders. Acknowledgements,
    /// duplicates and malformed frames all return `None`.
    pub fn deliver(&self, datagram: &Bytes) -> Option<UrbEnvelope> {
        let envelope = match LinkEnvelope::decode(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "dropping link frame");
                return None;
            }
        };

        let link = match self
            .links
            .get(usize::from(envelope.sender))
            .and_then(Option::as_ref)
        {
            Some(link) => link,
            None => {
                tracing::debug!(process = envelope.sender, "dropping frame from unknown process");
                return None;
            }
        };

        // Checked before the link acknowledges or records anything.
        let message = match UrbEnvelope::decode(&envelope.payload) {
            Ok(message) if usize::from(message.origin) < self.processes => message,
            Ok(message) => {
                tracing::debug!(origin = message.origin, "dropping message from unknown origin");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping broadcast frame");
                return None;
            }
        };

        if !link.recv_message(&envelope) {
            return None;
        }
        let id = self.interner.assign_id(&envelope.payload);

        let mut holders = self.holders.lock();
        if !holders.received.contains_key(&id) {
            holders.received.insert(id, HashSet::new());
            drop(holders);

            self.relay(envelope.payload.clone());

            holders = self.holders.lock();
            holders.hold(id, self.local);
        }

        let count = holders.hold(id, envelope.sender);
        if self.has_quorum(count) && holders.delivered.insert(id) {
            tracing::trace!(
                origin = message.origin,
                message = %id,
                holders = count,
                "uniform delivery"
            );
            return Some(message);
        }
        None
    }
}
