//! # Binary Decoder
//!
//! Turns raw register words into scaled engineering values according to a
//! [`ReadRecipe`] taken from the metric catalog.
//!
//! ## Supported Data Types
//!
//! | Type | Registers | Aliases |
//! |------|-----------|---------|
//! | u16 | 1 | uint16, u16 |
//! | i16 | 1 | int16, s16 |
//! | u32 | 2 | uint32, u32 |
//! | i32 | 2 | int32, s32 |
//! | u32 (low word first) | 2 | uint32le |
//! | i32 (low word first) | 2 | int32le |
//! | u64 | 4 | uint64, u64 |
//! | i64 | 4 | int64, s64 |
//! | f32 | 2 | float32, float, ieee754 |

use serde::{Deserialize, Serialize};

use crate::bytes::{ByteOrder, RegisterBuffers};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::RegisterKind;

/// Numeric layout of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "uint16", alias = "u16", alias = "U16")]
    U16,
    #[serde(rename = "int16", alias = "i16", alias = "s16", alias = "S16")]
    I16,
    #[serde(rename = "uint32", alias = "u32", alias = "U32")]
    U32,
    #[serde(rename = "int32", alias = "i32", alias = "s32", alias = "S32")]
    I32,
    #[serde(rename = "uint32le")]
    U32Le,
    #[serde(rename = "int32le")]
    I32Le,
    #[serde(rename = "uint64", alias = "u64", alias = "U64")]
    U64,
    #[serde(rename = "int64", alias = "i64", alias = "s64", alias = "S64")]
    I64,
    #[serde(
        rename = "float32",
        alias = "f32",
        alias = "float",
        alias = "ieee754",
        alias = "IEEE754"
    )]
    F32,
}

impl DataType {
    /// Number of 16-bit registers the type occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            Self::U16 | Self::I16 => 1,
            Self::U32 | Self::I32 | Self::U32Le | Self::I32Le | Self::F32 => 2,
            Self::U64 | Self::I64 => 4,
        }
    }

    /// Types whose name pins the word order regardless of the recipe.
    pub fn forced_order(&self) -> Option<ByteOrder> {
        match self {
            Self::U32Le | Self::I32Le => Some(ByteOrder::Little),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::U32Le => "uint32le",
            Self::I32Le => "int32le",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::F32 => "float32",
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// How to read and decode one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRecipe {
    /// Register table to read from
    pub function: RegisterKind,
    /// Word count requested from the device
    pub words: u16,
    /// Numeric layout
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Multiplier applied after decoding
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Word order for multi-register types (big-endian when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_order: Option<ByteOrder>,
}

impl ReadRecipe {
    pub fn new(function: RegisterKind, data_type: DataType, scale: f64) -> Self {
        Self {
            function,
            words: data_type.word_count(),
            data_type,
            scale,
            byte_order: None,
        }
    }

    /// Word order actually used for decoding.
    pub fn effective_order(&self) -> ByteOrder {
        self.data_type
            .forced_order()
            .or(self.byte_order)
            .unwrap_or_default()
    }

    /// Words to request: never fewer than the data type needs.
    pub fn read_words(&self) -> u16 {
        self.words.max(self.data_type.word_count())
    }
}

/// Decode raw words with the given recipe and apply its scale.
///
/// # Example
///
/// ```rust
/// use winet_bridge::codec::{decode_words, DataType, ReadRecipe};
/// use winet_bridge::RegisterKind;
///
/// let recipe = ReadRecipe::new(RegisterKind::Input, DataType::U32, 0.1);
/// let value = decode_words(&[0x0000, 0x3039], &recipe).unwrap();
/// assert!((value - 1234.5).abs() < 1e-9);
/// ```
pub fn decode_words(words: &[u16], recipe: &ReadRecipe) -> BridgeResult<f64> {
    let buffers = RegisterBuffers::from_words(words);
    let raw = decode_raw(&buffers, recipe.data_type, recipe.effective_order())?;
    Ok(raw * recipe.scale)
}

/// Decode without scaling.
pub fn decode_raw(
    buffers: &RegisterBuffers,
    data_type: DataType,
    order: ByteOrder,
) -> BridgeResult<f64> {
    let value = match data_type {
        DataType::U16 => buffers.u16().map(f64::from),
        DataType::I16 => buffers.i16().map(f64::from),
        DataType::U32 | DataType::U32Le => buffers.u32(order).map(f64::from),
        DataType::I32 | DataType::I32Le => buffers.i32(order).map(f64::from),
        DataType::U64 => buffers.u64(order).map(|v| v as f64),
        DataType::I64 => buffers.i64(order).map(|v| v as f64),
        DataType::F32 => buffers.f32(order).map(f64::from),
    };

    value.ok_or_else(|| {
        BridgeError::invalid_data(format!(
            "Not enough registers for {}: need {}, got {}",
            data_type.as_str(),
            data_type.word_count(),
            buffers.word_count()
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================
