//! Register protocol PDU
//!
//! Fixed-size stack buffer for request/response PDUs, plus the two
//! operations the bridge needs: building a register read request and
//! extracting the register words from its response.

use tracing::debug;

use crate::constants::MAX_PDU_SIZE;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::ReadRequest;

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> BridgeResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(BridgeError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Build the request PDU for a register read
    pub fn read_request(request: &ReadRequest) -> BridgeResult<Self> {
        let mut pdu = Self::new();
        pdu.push(request.kind.function_code())?;
        pdu.push_u16(request.address)?;
        pdu.push_u16(request.quantity)?;
        debug!(
            "PDU built: FC={:02X} addr={} qty={}",
            request.kind.function_code(),
            request.address,
            request.quantity
        );
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> BridgeResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(BridgeError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> BridgeResult<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    /// Extract register words from a read response.
    ///
    /// Exception responses become [`BridgeError::Exception`]; a function code
    /// or byte count that does not match the request is a protocol error.
    pub fn parse_registers(&self, request: &ReadRequest) -> BridgeResult<Vec<u16>> {
        let data = self.as_slice();
        let expected_fc = request.kind.function_code();

        let fc = self
            .function_code()
            .ok_or_else(|| BridgeError::protocol("Empty response PDU"))?;

        if self.is_exception() {
            let code = data.get(1).copied().unwrap_or(0);
            debug!("Exception response: FC={:02X} code={:02X}", fc, code);
            return Err(BridgeError::exception(fc & 0x7F, code));
        }

        if fc != expected_fc {
            return Err(BridgeError::protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                expected_fc, fc
            )));
        }

        let byte_count = *data
            .get(1)
            .ok_or_else(|| BridgeError::protocol("Missing byte count"))? as usize;
        let expected_bytes = request.quantity as usize * 2;
        if byte_count != expected_bytes || data.len() < 2 + byte_count {
            return Err(BridgeError::protocol(format!(
                "Byte count mismatch: expected {}, header {}, payload {}",
                expected_bytes,
                byte_count,
                data.len().saturating_sub(2)
            )));
        }

        Ok(data[2..2 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}
