use std::fmt;
use std::net::SocketAddr;

/// A process identifier, 0-indexed internally.
///
/// The delivery log and the membership file use 1-indexed identifiers, the conversion happens only
/// at those two boundaries.
pub type ProcessId = u16;

/// Describes a single member of the group.
///
/// Built once at startup from the membership data and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    id: ProcessId,
    address: SocketAddr,
    message_count: i32,
    // Deduplicated and sorted.
    dependencies: Vec<ProcessId>,
    is_local: bool,
}

impl ProcessDescriptor {
    /// Creates a new descriptor.
    ///
    /// The dependencies are normalized here, so every consumer can rely on them being sorted and
    /// without duplicates.
    pub fn new(
        id: ProcessId,
        address: SocketAddr,
        message_count: i32,
        dependencies: impl IntoIterator<Item = ProcessId>,
        is_local: bool,
    ) -> Self {
        let mut dependencies: Vec<ProcessId> = dependencies.into_iter().collect();
        dependencies.sort_unstable();
        dependencies.dedup();
        ProcessDescriptor {
            id,
            address,
            message_count,
            dependencies,
            is_local,
        }
    }

    #[inline]
    pub fn id(&self) -> ProcessId {
        self.id
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn message_count(&self) -> i32 {
        self.message_count
    }

    #[inline]
    pub fn dependencies(&self) -> &[ProcessId] {
        &self.dependencies
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.is_local
    }
}

impl fmt::Display for ProcessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Process{{ id: {}, address: {}, messages: {}, local: {} }}",
            u32::from(self.id) + 1,
            self.address,
            self.message_count,
            self.is_local
        )
    }
}
