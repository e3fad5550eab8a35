//! The envelopes each layer wraps around the payload of the layer above.
//!
//! Every integer is fixed width and big-endian, there is no padding and no length prefix, a
//! datagram carries exactly one perfect link envelope:
//!
//! ```text
//! Perfect link:      [sender: u16][ack: u8][payload ...]
//! Uniform reliable:  [origin: u16][payload ...]
//! FIFO:              [origin: u16][seq: i32][payload: i32]
//! Localized causal:  [origin: u16][clock: i32 x k][payload: i32]
//! ```
//!
//! The causal envelope is the only one whose length depends on who sent it, `k` is the number of
//! dependencies of the origin. Decoding it therefore happens in two steps, first [`peek_origin`]
//! and then [`CausalEnvelope::decode`] with the dependency count of that origin.
//!
//! Decoding never panics on garbage, a frame that is too short or too long is a [`FrameError`].
use crate::process::ProcessId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

const LINK_HEADER: usize = 3;
const URB_HEADER: usize = 2;
const FIFO_LENGTH: usize = 10;
const CAUSAL_FIXED: usize = 6;

const FLAG_DATA: u8 = 0;
const FLAG_ACK: u8 = 1;

/// The reasons a frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame is shorter than the layer header.
    #[error("{layer} frame needs at least {expected} bytes, got {actual}")]
    Undersized {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The frame does not have the exact length the layer expects.
    #[error("{layer} frame needs exactly {expected} bytes, got {actual}")]
    LengthMismatch {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The acknowledgement flag is neither 0 nor 1.
    #[error("invalid acknowledgement flag {0}")]
    InvalidFlag(u8),

    /// The frame names a process outside of the membership.
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),
}

type FrameResult<T> = std::result::Result<T, FrameError>;

fn ensure_at_least(layer: &'static str, expected: usize, data: &[u8]) -> FrameResult<()> {
    if data.len() < expected {
        return Err(FrameError::Undersized {
            layer,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn ensure_exactly(layer: &'static str, expected: usize, data: &[u8]) -> FrameResult<()> {
    ensure_at_least(layer, expected, data)?;
    if data.len() != expected {
        return Err(FrameError::LengthMismatch {
            layer,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// The perfect link envelope, the one actually written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnvelope {
    pub sender: ProcessId,
    pub ack: bool,
    pub payload: Bytes,
}

impl LinkEnvelope {
    pub fn data(sender: ProcessId, payload: Bytes) -> Self {
        LinkEnvelope {
            sender,
            ack: false,
            payload,
        }
    }

    /// The acknowledgement the given process sends back after receiving this envelope.
    pub fn acknowledgement(&self, by: ProcessId) -> Self {
        LinkEnvelope {
            sender: by,
            ack: true,
            payload: self.payload.clone(),
        }
    }

    /// The data envelope this acknowledgement answers.
    ///
    /// The inverse of [`LinkEnvelope::acknowledgement`], `original_sender` is the process that
    /// sent the data in the first place, which is the receiver of this acknowledgement.
    pub fn acknowledged(&self, original_sender: ProcessId) -> Self {
        LinkEnvelope {
            sender: original_sender,
            ack: false,
            payload: self.payload.clone(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LINK_HEADER + self.payload.len());
        buf.put_u16(self.sender);
        buf.put_u8(if self.ack { FLAG_ACK } else { FLAG_DATA });
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(data: &Bytes) -> FrameResult<Self> {
        ensure_at_least("link", LINK_HEADER, data)?;
        let mut cursor = Cursor::new(&data[..]);
        let sender = cursor.get_u16();
        let ack = match cursor.get_u8() {
            FLAG_DATA => false,
            FLAG_ACK => true,
            flag => return Err(FrameError::InvalidFlag(flag)),
        };
        Ok(LinkEnvelope {
            sender,
            ack,
            payload: data.slice(LINK_HEADER..),
        })
    }
}

/// The uniform reliable broadcast envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrbEnvelope {
    pub origin: ProcessId,
    pub payload: Bytes,
}

impl UrbEnvelope {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(URB_HEADER + self.payload.len());
        buf.put_u16(self.origin);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(data: &Bytes) -> FrameResult<Self> {
        ensure_at_least("urb", URB_HEADER, data)?;
        let origin = Cursor::new(&data[..]).get_u16();
        Ok(UrbEnvelope {
            origin,
            payload: data.slice(URB_HEADER..),
        })
    }
}

/// The FIFO broadcast envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoEnvelope {
    pub origin: ProcessId,
    pub seq: i32,
    pub payload: i32,
}

impl FifoEnvelope {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FIFO_LENGTH);
        buf.put_u16(self.origin);
        buf.put_i32(self.seq);
        buf.put_i32(self.payload);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> FrameResult<Self> {
        ensure_exactly("fifo", FIFO_LENGTH, data)?;
        let mut cursor = Cursor::new(data);
        Ok(FifoEnvelope {
            origin: cursor.get_u16(),
            seq: cursor.get_i32(),
            payload: cursor.get_i32(),
        })
    }
}

/// The localized causal broadcast envelope.
///
/// The clock is the projection of the origin's vector clock over its own dependencies, in the
/// same order as the sorted dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalEnvelope {
    pub origin: ProcessId,
    pub clock: Vec<i32>,
    pub payload: i32,
}

/// Read the origin of a causal envelope, needed to know how long its clock is.
pub fn peek_origin(data: &[u8]) -> FrameResult<ProcessId> {
    ensure_at_least("causal", CAUSAL_FIXED, data)?;
    Ok(Cursor::new(data).get_u16())
}

impl CausalEnvelope {
    pub fn encoded_len(dependencies: usize) -> usize {
        CAUSAL_FIXED + 4 * dependencies
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.clock.len()));
        buf.put_u16(self.origin);
        for entry in &self.clock {
            buf.put_i32(*entry);
        }
        buf.put_i32(self.payload);
        buf.freeze()
    }

    /// Decode an envelope whose origin has `dependencies` entries in its clock.
    pub fn decode(data: &[u8], dependencies: usize) -> FrameResult<Self> {
        ensure_exactly("causal", Self::encoded_len(dependencies), data)?;
        let mut cursor = Cursor::new(data);
        let origin = cursor.get_u16();
        let clock = (0..dependencies).map(|_| cursor.get_i32()).collect();
        let payload = cursor.get_i32();
        Ok(CausalEnvelope {
            origin,
            clock,
            payload,
        })
    }
}
