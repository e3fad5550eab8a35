//! Interning of message bytes.
//!
//! Every layer identifies a message by its exact bytes, and those bytes would otherwise be copied
//! into every retransmission and delivery job. The [`Interner`] assigns each distinct byte string
//! a dense [`MessageId`] the first time it is seen, so the jobs capture a small integer instead.
//!
//! Identifiers are never reused and the bytes behind an identifier are never released while the
//! interner lives. There is no eviction, the structure lives exactly as long as the process run.
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// A stable handle for an interned byte string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

impl MessageId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct Entries {
    forward: HashMap<Bytes, MessageId>,
    // Append only, the position is the identifier.
    reverse: Vec<Bytes>,
}

/// Maps byte strings to identifiers and back.
///
/// Reads are by far the common operation, so the entries are guarded by a read-write lock and
/// only the first sight of a new byte string takes the exclusive side.
#[derive(Default)]
pub struct Interner {
    entries: RwLock<Entries>,
}

impl Interner {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the identifier of the given bytes, assigning the next one if they were never seen.
    pub fn assign_id(&self, value: impl AsRef<[u8]>) -> MessageId {
        let value = value.as_ref();
        if let Some(id) = self.get_id(value) {
            return id;
        }

        let mut entries = self.entries.write();
        // Someone could have inserted the same value between releasing the read lock and
        // acquiring the write lock.
        if let Some(id) = entries.forward.get(value) {
            return *id;
        }

        let id = MessageId(entries.reverse.len());
        let value = Bytes::copy_from_slice(value);
        entries.reverse.push(value.clone());
        entries.forward.insert(value, id);
        id
    }

    /// Returns the bytes behind the identifier, `None` if the identifier was never assigned.
    pub fn get_value(&self, id: MessageId) -> Option<Bytes> {
        self.entries.read().reverse.get(id.0).cloned()
    }

    /// Returns the identifier of the given bytes without assigning a new one.
    pub fn get_id(&self, value: impl AsRef<[u8]>) -> Option<MessageId> {
        self.entries.read().forward.get(value.as_ref()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::{Interner, MessageId};
    use std::sync::Arc;

    #[test]
    fn should_assign_dense_identifiers() {
        let interner = Interner::new();

        let first = interner.assign_id(b"hello");
        let second = interner.assign_id(b"world");
        let again = interner.assign_id(b"hello".to_vec());

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(first, again);
        assert_eq!(interner.len(), 2);

        assert_eq!(interner.get_value(first).unwrap().as_ref(), b"hello");
        assert_eq!(interner.get_id(b"world"), Some(second));
    }

    #[test]
    fn should_return_none_for_unknown() {
        let interner = Interner::new();
        interner.assign_id([0u8, 1, 2]);

        assert!(interner.get_value(MessageId(1)).is_none());
        assert!(interner.get_id([0u8, 1]).is_none());
        assert!(interner.get_id([0u8; 0]).is_none());
    }

    #[test]
    fn should_not_duplicate_under_concurrency() {
        let interner = Arc::new(Interner::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let interner = Arc::clone(&interner);
            handles.push(std::thread::spawn(move || {
                (0..100u32)
                    .map(|i| interner.assign_id(i.to_be_bytes()))
                    .collect::<Vec<MessageId>>()
            }));
        }

        let results: Vec<Vec<MessageId>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in results.iter() {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(interner.len(), 100);
    }
}
