//! # WiNet Bridge - Gateway Session and Meter Register Bridge
//!
//! Bridges a session-oriented telemetry gateway (JSON over WebSocket) and a
//! Modbus TCP meter into one normalized per-device status feed.
//!
//! ## Features
//!
//! - **Gateway Session**: connect, login, device enumeration and staged
//!   polling with request timeouts, a watchdog and automatic reconnection
//! - **Register Catalog**: metric definitions with per-model registers and
//!   decode recipes, a built-in catalog included
//! - **Register Map Resolution**: layered defaults plus a persisted site
//!   override file that doubles as a calibration cache
//! - **Meter Reads**: sequential reads with retry, periodic health check and
//!   per-sweep augmentation of the status store
//! - **Discovery**: tolerance matching of scanned registers against
//!   operator-supplied reference readings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use winet_bridge::config::GatewayConfig;
//! use winet_bridge::session::{GatewaySession, LoggingPublisher};
//! use winet_bridge::{BridgeResult, LabelTable};
//!
//! #[tokio::main]
//! async fn main() -> BridgeResult<()> {
//!     let config = GatewayConfig::new("192.168.1.10").with_poll_interval_secs(10);
//!     let mut session: GatewaySession<_> =
//!         GatewaySession::new(config, Arc::new(LabelTable::default()), LoggingPublisher);
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     session.run(shutdown).await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Protocol limits and session timings
pub mod constants;

/// Stack-allocated register protocol PDU
pub mod pdu;

/// Register protocol request types
pub mod protocol;

/// Modbus TCP transport
pub mod transport;

/// Register client
pub mod client;

/// Byte order handling for multi-register values
pub mod bytes;

/// Decoding of register words by recipe
pub mod codec;

// ============================================================================
// Bridge modules
// ============================================================================

/// Metric definitions
pub mod catalog;

/// Metric id to register resolution
pub mod register_map;

/// Meter reads, health check and store augmentation
pub mod meter;

/// Register discovery
pub mod discovery;

/// Per-device data points
pub mod store;

/// Translation table
pub mod labels;

/// Process configuration
pub mod config;

/// Gateway WebSocket session
pub mod session;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Core client API ===
pub use client::{GenericRegisterClient, ModbusTcpClient, RegisterRead};

// === Error handling ===
pub use error::{BridgeError, BridgeResult};

// === Core types ===
pub use bytes::ByteOrder;
pub use codec::{DataType, ReadRecipe};
pub use protocol::{ReadRequest, RegisterKind, UnitId};

// === Bridge ===
pub use catalog::{MetricDefinition, RegisterCatalog};
pub use config::BridgeConfig;
pub use discovery::{scan_registers, DiscoveryMatch, ExpectedValues, MeterCandidate, ScanOptions};
pub use labels::LabelTable;
pub use meter::MeterReader;
pub use register_map::{InverterClass, RegisterMap, RegisterMapResolver};
pub use session::{GatewaySession, LoggingPublisher, Publisher};
pub use store::{DataPoint, DeviceRecord, DeviceStatusStore, PointValue};

// === Monitoring ===
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
