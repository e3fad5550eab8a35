//! Uniform localized causal broadcast.
//!
//! Each process declares the processes it depends on, itself always included. A message carries
//! the projection of its origin's vector clock over the origin's dependencies, and is delivered
//! only once the local vector clock reached that projection for every dependency.
//!
//! A blocked message does not re-check all of its dependencies whenever the clock moves. It
//! watches a single unmet dependency, the pair `(process, required count)`, and is re-examined
//! only when the clock entry of that process reaches exactly the required count. On
//! re-examination the satisfied dependencies are discarded and the next unmet one becomes the
//! watched dependency. The first watched dependency is picked at random, spreading the blocked
//! messages over the watch buckets.
use crate::broadcast::backpressure::Backpressure;
use crate::broadcast::uniform_reliable::UniformReliable;
use crate::configuration::BackpressurePolicy;
use crate::identity::{Interner, MessageId};
use crate::process::{ProcessDescriptor, ProcessId};
use crate::sink::{Event, Sink};
use crate::wire::{peek_origin, CausalEnvelope, UrbEnvelope};
use bytes::Bytes;
use mepa::Shutdown;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type Dependency = (ProcessId, i32);

struct CausalState {
    // Messages delivered from each process.
    vector_clock: Vec<i32>,

    // Messages broadcast by the local process.
    broadcasts: i32,

    // Unmet dependencies of each blocked message, not counting the watched one.
    dependencies: HashMap<MessageId, VecDeque<Dependency>>,

    // Indexed by process, then by the count the blocked messages wait for.
    waiting: Vec<HashMap<i32, Vec<MessageId>>>,

    rng: StdRng,
}

impl CausalState {
    fn is_met(&self, (process, required): Dependency) -> bool {
        self.vector_clock[usize::from(process)] >= required
    }

    fn watch(&mut self, message: MessageId, (process, required): Dependency) {
        self.waiting[usize::from(process)]
            .entry(required)
            .or_default()
            .push(message);
    }

    /// Move every message watching the current clock of the process into the queue.
    fn release(&mut self, process: ProcessId, queue: &mut VecDeque<MessageId>) {
        let reached = self.vector_clock[usize::from(process)];
        if let Some(messages) = self.waiting[usize::from(process)].remove(&reached) {
            queue.extend(messages);
        }
    }
}

pub struct LocalizedCausal {
    urb: UniformReliable,
    processes: Vec<ProcessDescriptor>,
    interner: Arc<Interner>,
    sink: Arc<dyn Sink>,
    backpressure: Backpressure,
    shutdown: Shutdown,

    // A single lock, causal delivery crosses every process.
    state: Mutex<CausalState>,
}

impl LocalizedCausal {
    /// Creates the broadcast, `processes` must be ordered by identifier.
    ///
    /// Without a seed the watch selection is seeded from the system entropy.
    pub fn new(
        urb: UniformReliable,
        processes: Vec<ProcessDescriptor>,
        interner: Arc<Interner>,
        sink: Arc<dyn Sink>,
        policy: BackpressurePolicy,
        seed: Option<u64>,
        shutdown: Shutdown,
    ) -> Self {
        let size = processes.len();
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        LocalizedCausal {
            urb,
            processes,
            interner,
            sink,
            backpressure: Backpressure::new(policy),
            shutdown,
            state: Mutex::new(CausalState {
                vector_clock: vec![0; size],
                broadcasts: 0,
                dependencies: HashMap::new(),
                waiting: vec![HashMap::new(); size],
                rng,
            }),
        }
    }

    fn local(&self) -> &ProcessDescriptor {
        &self.processes[usize::from(self.urb.local())]
    }

    /// Broadcast the payload and deliver it to the local process right away.
    ///
    /// Waits while too many local messages are still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Stopped`] if the stack stops while waiting, the payload is then
    /// never broadcast.
    pub async fn broadcast(&self, payload: i32) -> crate::Result<()> {
        self.backpressure.admit(&self.shutdown).await?;

        let local = self.local();
        let envelope = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            // The local clock entry moves on delivery, for the local process the projection is
            // the number of broadcasts instead.
            let clock = local
                .dependencies()
                .iter()
                .map(|&dependency| {
                    if dependency == local.id() {
                        state.broadcasts
                    } else {
                        state.vector_clock[usize::from(dependency)]
                    }
                })
                .collect();
            let envelope = CausalEnvelope {
                origin: local.id(),
                clock,
                payload,
            }
            .encode();
            self.interner.assign_id(&envelope);

            self.sink.record(Event::Broadcast { payload });
            self.sink.record(Event::Deliver {
                origin: local.id(),
                payload,
            });
            state.broadcasts += 1;
            state.vector_clock[usize::from(local.id())] += 1;
            self.trigger_deliveries(state, local.id());
            envelope
        };

        if self.urb.broadcast(envelope).is_some() {
            self.backpressure.delivered();
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

    fn decode(&self, payload: &[u8]) -> crate::Result<CausalEnvelope> {
        let origin = peek_origin(payload)?;
        let process = self
            .processes
            .get(usize::from(origin))
            .ok_or(crate::FrameError::UnknownProcess(origin))?;
        Ok(CausalEnvelope::decode(
            payload,
            process.dependencies().len(),
        )?)
    }

    fn handle(&self, message: UrbEnvelope) {
        let envelope = match self.decode(&message.payload) {
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
                tracing::debug!(origin = message.origin, error = %e, "dropping causal frame");
                return;
            }
        };

        // Delivered locally when broadcast, now it is only back from the network.
        if envelope.origin == self.urb.local() {
            self.backpressure.delivered();
            return;
        }

        let id = self.interner.assign_id(&message.payload);
        let dependencies = self.processes[usize::from(envelope.origin)].dependencies();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut unmet: Vec<Dependency> = dependencies
            .iter()
            .copied()
            .zip(envelope.clock.iter().copied())
            .filter(|&dependency| !state.is_met(dependency))
            .collect();

        if unmet.is_empty() {
            self.sink.record(Event::Deliver {
                origin: envelope.origin,
                payload: envelope.payload,
            });
            state.vector_clock[usize::from(envelope.origin)] += 1;
            self.trigger_deliveries(state, envelope.origin);
            return;
        }

        unmet.shuffle(&mut state.rng);
        let watched = unmet[0];
        tracing::trace!(
            origin = envelope.origin,
            message = %id,
            unmet = unmet.len(),
            "holding message back"
        );
        state.watch(id, watched);
        state.dependencies.insert(id, unmet.into_iter().skip(1).collect());
    }

    /// Deliver everything unblocked by the clock entry of the process moving forward.
    ///
    /// Every delivery moves another clock entry forward, which can unblock more messages, so this
    /// runs through a work queue until nothing else is unblocked.
    fn trigger_deliveries(&self, state: &mut CausalState, process: ProcessId) {
        let mut queue = VecDeque::new();
        state.release(process, &mut queue);

        while let Some(id) = queue.pop_front() {
            let mut blocked = None;
            if let Some(remaining) = state.dependencies.get_mut(&id) {
                while let Some(dependency) = remaining.pop_front() {
                    let (process, required) = dependency;
                    if state.vector_clock[usize::from(process)] < required {
                        blocked = Some(dependency);
                        break;
                    }
                }
            }

            if let Some(dependency) = blocked {
                state.watch(id, dependency);
                continue;
            }
            state.dependencies.remove(&id);

            let envelope = match self.interner.get_value(id).map(|v| self.decode(&v)) {
                Some(Ok(envelope)) => envelope,
                _ => {
                    tracing::warn!(message = %id, "blocked message vanished");
                    continue;
                }
            };
            self.sink.record(Event::Deliver {
                origin: envelope.origin,
                payload: envelope.payload,
            });
            state.vector_clock[usize::from(envelope.origin)] += 1;
            state.release(envelope.origin, &mut queue);
        }
    }
}
