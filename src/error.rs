//! Error types for the bridge
//!
//! A single error enum covers both channels (gateway session and register
//! protocol) so that the session loop can classify any failure into
//! "reconnect", "skip this update" or "surface to caller".

use thiserror::Error;

/// Result type used throughout the crate
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the gateway session, the register client and the
/// catalog/override loaders.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Underlying I/O failure (socket or file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation did not complete in time
    #[error("Timeout: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed frame or unexpected function code
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The remote device answered with a Modbus exception
    #[error("Modbus exception: function {function:#04x}, code {code:#04x} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Payload did not match the expected shape
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Bad configuration or catalog content
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Metric id not present in the catalog or register map
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Gateway session protocol violation (missing token, failed login, ...)
    #[error("Session error: {message}")]
    Session { message: String },

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Build an exception error from a function/exception code pair.
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            message: crate::protocol::exception_description(code).to_string(),
        }
    }

    /// True for failures of the link itself, after which the connection must
    /// be dropped and re-established.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection { .. } | Self::Timeout { .. } | Self::Protocol { .. }
        )
    }

    /// True when retrying the same operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Exception { code, .. } => matches!(
                *code,
                crate::constants::EXCEPTION_SERVER_DEVICE_BUSY
                    | crate::constants::EXCEPTION_ACKNOWLEDGE
                    | crate::constants::EXCEPTION_GATEWAY_TARGET_FAILED
            ),
            other => other.is_transport(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::connection(format!("websocket: {}", err))
    }
}
