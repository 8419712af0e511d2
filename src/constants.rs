//! Protocol and session constants
//!
//! Register-protocol limits follow the Modbus application protocol:
//! - Maximum PDU size: 253 bytes (RS485 ADU limit of 256 bytes minus address and CRC)
//! - Register read limit is calculated to fit within the PDU size constraint
//!
//! Session timings are shared by every gateway session.

// ============================================================================
// Register protocol framing
// ============================================================================

/// MBAP header length on the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size of the Modbus application protocol
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum number of registers for FC03/FC04
///
/// Response PDU: Function Code(1) + Byte Count(1) + N × 2 ≤ 253, so N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Register client
// ============================================================================

/// Total attempts for one meter read cycle (first try included)
pub const METER_READ_ATTEMPTS: u32 = 2;

/// Delay between a failed meter read and the retry
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;

/// Default per-request timeout of the register transport
pub const DEFAULT_REGISTER_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on meter augmentation at the end of a sweep
pub const METER_AUGMENT_TIMEOUT_MS: u64 = 15_000;

/// Default interval of the register health check
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

// ============================================================================
// Gateway session
// ============================================================================

/// Every outbound request must see an inbound message within this window
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Watchdog fires after this many poll intervals without inbound traffic
pub const WATCHDOG_INTERVAL_MULTIPLIER: i64 = 6;

/// Consecutive skipped poll triggers that force a reconnect
pub const MAX_SKIPPED_POLLS: u32 = 5;

/// Longest accepted poll cadence
pub const MAX_POLL_INTERVAL_SECS: u64 = 3_600;

/// Reconnect waits this many poll intervals before dialing again
pub const RECONNECT_DELAY_MULTIPLIER: u64 = 3;

/// A data point with an unchanged value is still rewritten after this long
pub const STALE_REFRESH_SECS: i64 = 300;

/// Result code the gateway uses for success
pub const RESULT_CODE_SUCCESS: i64 = 1;

/// Prefix of translatable label keys
pub const TRANSLATION_KEY_PREFIX: &str = "I18N_";

/// Sentinel the gateway sends for an unavailable numeric value
pub const ABSENT_VALUE_SENTINEL: &str = "--";

/// String-breakdown elements whose name starts with this prefix feed the
/// aggregate power point
pub const AGGREGATE_POWER_PREFIX: &str = "MPPT";

/// Display name of the aggregate power point
pub const AGGREGATE_POWER_NAME: &str = "MPPT Total Power";
