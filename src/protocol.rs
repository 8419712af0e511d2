//! Register protocol definitions
//!
//! Only the two register read functions are used by the bridge; everything
//! else a device may support is out of reach on purpose.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    EXCEPTION_ACKNOWLEDGE, EXCEPTION_GATEWAY_PATH_UNAVAILABLE, EXCEPTION_GATEWAY_TARGET_FAILED,
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_SERVER_DEVICE_BUSY, EXCEPTION_SERVER_DEVICE_FAILURE, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, MAX_READ_REGISTERS,
};
use crate::error::{BridgeError, BridgeResult};

/// Unit (slave) identifier on the register bus
pub type UnitId = u8;

/// Register table a read is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// 4X table, function 0x03
    #[serde(alias = "4X", alias = "4x")]
    Holding,
    /// 3X table, function 0x04
    #[default]
    #[serde(alias = "3X", alias = "3x")]
    Input,
}

impl RegisterKind {
    #[inline]
    pub fn function_code(&self) -> u8 {
        match self {
            Self::Holding => FC_READ_HOLDING_REGISTERS,
            Self::Input => FC_READ_INPUT_REGISTERS,
        }
    }

    pub fn from_function_code(code: u8) -> Option<Self> {
        match code {
            FC_READ_HOLDING_REGISTERS => Some(Self::Holding),
            FC_READ_INPUT_REGISTERS => Some(Self::Input),
            _ => None,
        }
    }
}

impl FromStr for RegisterKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "holding" | "4x" | "3" | "03" => Ok(Self::Holding),
            "input" | "3x" | "4" | "04" => Ok(Self::Input),
            other => Err(BridgeError::invalid_data(format!(
                "Unknown register kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// One addressed register read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub unit_id: UnitId,
    pub kind: RegisterKind,
    pub address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    /// Build a request, rejecting quantities the protocol cannot carry.
    pub fn new(unit_id: UnitId, kind: RegisterKind, address: u16, quantity: u16) -> BridgeResult<Self> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(BridgeError::invalid_data(format!(
                "Invalid quantity: {} (must be 1-{})",
                quantity, MAX_READ_REGISTERS
            )));
        }
        Ok(Self {
            unit_id,
            kind,
            address,
            quantity,
        })
    }
}

/// Human-readable text for a Modbus exception code.
pub fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
