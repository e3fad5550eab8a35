#![allow(dead_code)]

use bytes::Bytes;
use dabcast::{
    Event, Inbound, MemorySink, Membership, ProcessId, Stack, StackConfiguration, Transport,
};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// An in-memory network that loses and duplicates datagrams.
///
/// Reordering comes for free, every stack runs its deliveries on several workers.
pub struct Network {
    routes: RwLock<HashMap<SocketAddr, Inbound>>,
    loss: f64,
    duplication: f64,
    rng: Mutex<StdRng>,
}

impl Network {
    pub fn new(loss: f64, duplication: f64, seed: u64) -> Arc<Self> {
        Arc::new(Network {
            routes: RwLock::new(HashMap::new()),
            loss,
            duplication,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn connect(&self, address: SocketAddr, inbound: Inbound) {
        self.routes.write().insert(address, inbound);
    }

    pub fn disconnect(&self, address: SocketAddr) {
        self.routes.write().remove(&address);
    }
}

impl Transport for Network {
    fn send(&self, data: &[u8], destination: SocketAddr) -> dabcast::Result<()> {
        let copies = {
            let mut rng = self.rng.lock();
            if rng.gen_bool(self.loss) {
                0
            } else if rng.gen_bool(self.duplication) {
                2
            } else {
                1
            }
        };

        if let Some(inbound) = self.routes.read().get(&destination) {
            for _ in 0..copies {
                inbound.receive(Bytes::copy_from_slice(data));
            }
        }
        Ok(())
    }
}

pub fn address(id: usize) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 11001 + id as u16))
}

/// The membership file of a group of `size` processes, followed by the dependency lines.
pub fn hosts(size: usize, dependencies: &[&str]) -> String {
    let mut content = format!("{}\n", size);
    for id in 0..size {
        let address = address(id);
        content.push_str(&format!("{} {} {}\n", id + 1, address.ip(), address.port()));
    }
    for line in dependencies {
        content.push_str(line);
        content.push('\n');
    }
    content
}

pub fn configuration() -> StackConfiguration {
    StackConfiguration::builder()
        .with_retransmit_interval(Duration::from_millis(2))
        .with_workers(2)
        .with_seed(7)
        .build()
        .unwrap()
}

pub struct Cluster {
    pub network: Arc<Network>,
    pub stacks: Vec<Arc<Stack>>,
    pub sinks: Vec<Arc<MemorySink>>,
}

impl Cluster {
    /// Start the processes in `running`, the others are considered crashed from the start.
    pub fn start(
        content: &str,
        running: &[usize],
        messages: i32,
        configuration: &StackConfiguration,
        network: Arc<Network>,
    ) -> Self {
        let mut stacks = Vec::new();
        let mut sinks = Vec::new();
        for &id in running {
            let membership = Membership::parse(content, id as ProcessId, messages).unwrap();
            let sink = Arc::new(MemorySink::new());
            let stack = Stack::start(configuration, membership, network.clone(), sink.clone());
            network.connect(address(id), stack.inbound());
            stacks.push(Arc::new(stack));
            sinks.push(sink);
        }
        Cluster {
            network,
            stacks,
            sinks,
        }
    }

    /// Every running process broadcasts the payloads `1..=messages` concurrently.
    pub async fn broadcast_all(&self, messages: i32) {
        let handles: Vec<_> = self
            .stacks
            .iter()
            .map(|stack| {
                let stack = Arc::clone(stack);
                tokio::spawn(async move {
                    for payload in 1..=messages {
                        stack.broadcast(payload).await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    /// Wait until every running process delivered `expected` messages.
    pub async fn wait_deliveries(&self, expected: usize, timeout: Duration) -> bool {
        eventually(timeout, || {
            self.sinks
                .iter()
                .all(|sink| sink.deliveries().len() >= expected)
        })
        .await
    }

    pub async fn stop(&self) {
        for stack in &self.stacks {
            stack.stop().await.unwrap();
        }
    }
}

pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// The payloads delivered from the origin, in delivery order.
pub fn delivered_from(sink: &MemorySink, origin: ProcessId) -> Vec<i32> {
    sink.deliveries()
        .into_iter()
        .filter(|(from, _)| *from == origin)
        .map(|(_, payload)| payload)
        .collect()
}

/// The delivery log as written to the output file.
pub fn log_lines(sink: &MemorySink) -> Vec<String> {
    sink.events().iter().map(Event::to_string).collect()
}
