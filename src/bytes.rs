//! # Register word buffers
//!
//! Multi-word register values are copied once into two byte buffers, one
//! per word-order interpretation, so a reading can be decoded as either
//! without going back to the device.
//!
//! ## Naming Convention
//!
//! For the words `[0x1234, 0x5678]`:
//! - big-endian buffer: \[0x12, 0x34, 0x56, 0x78\] → u32 `0x12345678`
//! - little-endian buffer: \[0x34, 0x12, 0x78, 0x56\] → u32 `0x56781234`
//!
//! The little-endian interpretation is the "low word first" layout many
//! inverters and meters use for 32-bit counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Word order of a multi-register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Most significant word first (network order)
    #[default]
    #[serde(alias = "be", alias = "abcd")]
    Big,
    /// Least significant word first
    #[serde(alias = "le", alias = "cdab")]
    Little,
}

impl ByteOrder {
    /// Short tag used in discovery encodings (`be` / `le`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Big => "be",
            Self::Little => "le",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Big => write!(f, "big-endian"),
            Self::Little => write!(f, "little-endian"),
        }
    }
}

/// Raw register words copied into both byte orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBuffers {
    be: Vec<u8>,
    le: Vec<u8>,
}

impl RegisterBuffers {
    /// Copy `words` into a big-endian and a little-endian buffer.
    pub fn from_words(words: &[u16]) -> Self {
        let mut be = Vec::with_capacity(words.len() * 2);
        let mut le = Vec::with_capacity(words.len() * 2);
        for word in words {
            be.extend_from_slice(&word.to_be_bytes());
            le.extend_from_slice(&word.to_le_bytes());
        }
        Self { be, le }
    }

    /// Number of whole words held.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.be.len() / 2
    }

    fn bytes<const N: usize>(&self, order: ByteOrder) -> Option<[u8; N]> {
        let buf = match order {
            ByteOrder::Big => &self.be,
            ByteOrder::Little => &self.le,
        };
        buf.get(..N)?.try_into().ok()
    }

    pub fn u16(&self) -> Option<u16> {
        self.bytes::<2>(ByteOrder::Big).map(u16::from_be_bytes)
    }

    pub fn i16(&self) -> Option<i16> {
        self.bytes::<2>(ByteOrder::Big).map(i16::from_be_bytes)
    }

    pub fn u32(&self, order: ByteOrder) -> Option<u32> {
        let bytes = self.bytes::<4>(order)?;
        Some(match order {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        })
    }

    pub fn i32(&self, order: ByteOrder) -> Option<i32> {
        self.u32(order).map(|v| v as i32)
    }

    pub fn u64(&self, order: ByteOrder) -> Option<u64> {
        let bytes = self.bytes::<8>(order)?;
        Some(match order {
            ByteOrder::Big => u64::from_be_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
        })
    }

    pub fn i64(&self, order: ByteOrder) -> Option<i64> {
        self.u64(order).map(|v| v as i64)
    }

    pub fn f32(&self, order: ByteOrder) -> Option<f32> {
        self.u32(order).map(f32::from_bits)
    }
}

// ============================================================================
// Tests
// ============================================================================
