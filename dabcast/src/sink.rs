//! Where broadcast and delivery events end up.
//!
//! The delivery log is the observable output of a process, one line per event:
//!
//! ```text
//! b <payload>             the local process broadcast <payload>
//! d <origin> <payload>    <payload> broadcast by <origin> was delivered
//! ```
//!
//! Process identifiers are 1-indexed in the log. The log is not diagnostic output, it is
//! written through a [`Sink`] and never through `tracing`.
use crate::process::ProcessId;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Broadcast { payload: i32 },
    Deliver { origin: ProcessId, payload: i32 },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Broadcast { payload } => write!(f, "b {}", payload),
            Event::Deliver { origin, payload } => {
                write!(f, "d {} {}", u32::from(*origin) + 1, payload)
            }
        }
    }
}

/// Receives the events in the order the layers produce them.
///
/// Called from inside the layers' critical sections, so recording must be quick and must never
/// call back into the stack.
pub trait Sink: Send + Sync + 'static {
    fn record(&self, event: Event);

    fn flush(&self) -> crate::Result<()>;
}

/// Appends the events to a file, buffered until [`Sink::flush`].
pub struct FileSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Create the file, truncating it if it already exists.
    pub fn create(path: impl AsRef<Path>) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FileSink {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Sink for FileSink {
    fn record(&self, event: Event) {
        if let Err(e) = writeln!(self.writer.lock(), "{}", event) {
            tracing::warn!(error = %e, %event, "failed writing event");
        }
    }

    fn flush(&self) -> crate::Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

/// Keeps the events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Default::default()
    }

    /// A copy of every event recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// The deliveries recorded so far, as `(origin, payload)` pairs.
    pub fn deliveries(&self) -> Vec<(ProcessId, i32)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Deliver { origin, payload } => Some((*origin, *payload)),
                Event::Broadcast { .. } => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn flush(&self) -> crate::Result<()> {
        Ok(())
    }
}
