use crate::broadcast::{Broadcast, LocalizedCausal, UniformFifo, UniformReliable};
use crate::configuration::StackConfiguration;
use crate::executor::{Executor, Scheduler};
use crate::identity::Interner;
use crate::link::PerfectLink;
use crate::membership::{Membership, Mode};
use crate::process::ProcessDescriptor;
use crate::sink::Sink;
use crate::transport::Transport;
use bytes::Bytes;
use mepa::{Shutdown, Signal};
use std::sync::{Arc, Weak};

/// The shortest datagram that can be a perfect link envelope.
const MIN_DATAGRAM: usize = 3;

struct Shared {
    membership: Membership,
    broadcast: Broadcast,
    executor: Executor,
    scheduler: Scheduler,
    sink: Arc<dyn Sink>,
    signal: Signal,
}

impl Shared {
    fn receive(self: &Arc<Self>, datagram: Bytes) {
        if datagram.len() < MIN_DATAGRAM {
            tracing::debug!(length = datagram.len(), "dropping short datagram");
            return;
        }

        let shared = Arc::clone(self);
        self.executor
            .add(move || shared.broadcast.deliver(&datagram));
    }
}

/// The whole broadcast stack of a single process.
///
/// Owns every layer, the worker pools and the stop signal. Inbound datagrams enter through
/// [`Stack::deliver`] or an [`Inbound`] handle, application payloads through
/// [`Stack::broadcast`], and the delivery log comes out of the [`Sink`].
pub struct Stack {
    shared: Arc<Shared>,
}

/// A handle feeding received datagrams into a [`Stack`].
///
/// Does not keep the stack alive, datagrams arriving after the stack is gone are dropped.
#[derive(Clone)]
pub struct Inbound {
    shared: Weak<Shared>,
}

impl Inbound {
    pub fn receive(&self, datagram: Bytes) {
        if let Some(shared) = self.shared.upgrade() {
            shared.receive(datagram);
        }
    }
}

impl Stack {
    /// Build every layer for the local process of the membership and start the worker pools.
    ///
    /// This must be called from within a Tokio runtime, the workers are Tokio tasks.
    pub fn start(
        configuration: &StackConfiguration,
        membership: Membership,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let local = membership.local().clone();
        let mode = membership.mode();
        let executor = Executor::new(configuration.workers());
        let scheduler = Scheduler::new(configuration.workers());
        let interner = Arc::new(Interner::new());
        let signal = Signal::new();

        let links = membership
            .processes()
            .iter()
            .filter(|process| process.id() != local.id())
            .map(|process| {
                PerfectLink::new(
                    local.id(),
                    process.clone(),
                    Arc::clone(&transport),
                    scheduler.clone(),
                    Arc::clone(&interner),
                    configuration.retransmit_interval(),
                )
            })
            .collect();
        let urb = UniformReliable::new(
            local.id(),
            membership.len(),
            links,
            Arc::clone(&interner),
        );

        let policy = configuration.backpressure(mode);
        let broadcast = match mode {
            Mode::Fifo => Broadcast::Fifo(UniformFifo::new(
                urb,
                interner,
                Arc::clone(&sink),
                policy,
                signal.subscribe(),
            )),
            Mode::Lcb => Broadcast::Causal(LocalizedCausal::new(
                urb,
                membership.processes().to_vec(),
                interner,
                Arc::clone(&sink),
                policy,
                configuration.seed(),
                signal.subscribe(),
            )),
        };

        tracing::info!(
            process = %local,
            group = membership.len(),
            mode = ?mode,
            backpressure = ?policy,
            "stack started"
        );

        Stack {
            shared: Arc::new(Shared {
                membership,
                broadcast,
                executor,
                scheduler,
                sink,
                signal,
            }),
        }
    }

    pub fn local(&self) -> &ProcessDescriptor {
        self.shared.membership.local()
    }

    pub fn membership(&self) -> &Membership {
        &self.shared.membership
    }

    /// A handle for the receiving side of the transport.
    pub fn inbound(&self) -> Inbound {
        Inbound {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// A listener of the stack stop signal.
    pub fn shutdown(&self) -> Shutdown {
        self.shared.signal.subscribe()
    }

    /// Hand a received datagram to the executor.
    ///
    /// Datagrams too short to be a perfect link envelope are dropped right away.
    pub fn deliver(&self, datagram: Bytes) {
        self.shared.receive(datagram);
    }

    /// Broadcast the application payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Stopped`] if the stack was stopped before the payload was admitted.
    pub async fn broadcast(&self, payload: i32) -> crate::Result<()> {
        self.shared.broadcast.broadcast(payload).await
    }

    /// Local messages broadcast but not delivered back yet.
    pub fn in_flight(&self) -> u64 {
        self.shared.broadcast.in_flight()
    }

    pub fn is_alive(&self) -> bool {
        !self.shared.signal.is_fired()
    }

    /// Stop the stack and flush the sink.
    ///
    /// Pending broadcasts fail with [`crate::Error::Stopped`], the deliveries already queued are
    /// drained, and the retransmissions are abandoned. Must not be called from inside a job.
    ///
    /// # Errors
    ///
    /// Only fails if flushing the sink fails.
    pub async fn stop(&self) -> crate::Result<()> {
        self.shared.signal.fire();
        self.shared.executor.stop().await;
        self.shared.scheduler.stop().await;
        self.shared.sink.flush()?;
        tracing::info!(process = %self.local(), "stack stopped");
        Ok(())
    }
}
