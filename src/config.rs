//! # Bridge Configuration
//!
//! JSON configuration of one bridge process: the gateway session, the
//! optional register-protocol meter, and the data files to load.
//!
//! ```json
//! {
//!   "gateway": { "host": "192.168.1.10", "password": "secret", "poll_interval_secs": 10 },
//!   "meter": { "host": "192.168.1.20", "unit_id": 1, "target_serial": "A2207123456" },
//!   "override_path": "/var/lib/winet/overrides.json"
//! }
//! ```
//!
//! Every field except `gateway.host` has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_REGISTER_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS,
    MAX_POLL_INTERVAL_SECS,
};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::UnitId;
use crate::register_map::InverterClass;

/// Default gateway WebSocket port.
pub const DEFAULT_GATEWAY_PORT: u16 = 8082;

/// Default gateway WebSocket path.
pub const DEFAULT_GATEWAY_PATH: &str = "/ws/home/overview";

/// Default poll cadence in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default register protocol port.
pub const DEFAULT_METER_PORT: u16 = 502;

/// Gateway session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://`
    pub secure: bool,
    pub path: String,
    pub username: String,
    pub password: String,
    pub lang: String,
    pub poll_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_GATEWAY_PORT,
            secure: false,
            path: DEFAULT_GATEWAY_PATH.to_string(),
            username: "admin".to_string(),
            password: "pw8888".to_string(),
            lang: "en_us".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// WebSocket URL of the gateway.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Register-protocol meter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: UnitId,
    pub timeout_ms: u64,
    pub retry_backoff_ms: u64,
    /// 0 disables the health check
    pub health_check_interval_secs: u64,
    /// Device receiving meter points; the first device when absent
    pub target_serial: Option<String>,
    /// Class used for generated register defaults
    pub inverter_class: Option<InverterClass>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_METER_PORT,
            unit_id: 1,
            timeout_ms: DEFAULT_REGISTER_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            target_serial: None,
            inverter_class: None,
        }
    }
}

impl MeterConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_target_serial(mut self, serial: impl Into<String>) -> Self {
        self.target_serial = Some(serial.into());
        self
    }

    pub fn with_inverter_class(mut self, class: InverterClass) -> Self {
        self.inverter_class = Some(class);
        self
    }

    /// `host:port` of the meter.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.health_check_interval_secs))
    }
}

/// Whole-process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub gateway: GatewayConfig,
    pub meter: Option<MeterConfig>,
    /// Metric catalog; the built-in one when absent
    pub catalog_path: Option<PathBuf>,
    pub class_defaults_path: Option<PathBuf>,
    pub override_path: Option<PathBuf>,
    /// Flat translation table
    pub labels_path: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn new(gateway: GatewayConfig) -> Self {
        Self {
            gateway,
            ..Self::default()
        }
    }

    pub fn with_meter(mut self, meter: MeterConfig) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn with_class_defaults_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.class_defaults_path = Some(path.into());
        self
    }

    pub fn with_override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn with_labels_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(path.into());
        self
    }

    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path.as_ref())?)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.gateway.host.trim().is_empty() {
            return Err(BridgeError::configuration("gateway.host is required"));
        }
        if self.gateway.secure && !cfg!(feature = "tls") {
            return Err(BridgeError::configuration(
                "gateway.secure requires the `tls` feature",
            ));
        }
        if self.gateway.poll_interval_secs == 0 {
            return Err(BridgeError::configuration(
                "gateway.poll_interval_secs must be positive",
            ));
        }
        if self.gateway.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(BridgeError::configuration(format!(
                "gateway.poll_interval_secs must not exceed {}",
                MAX_POLL_INTERVAL_SECS
            )));
        }
        if let Some(meter) = &self.meter {
            if meter.host.trim().is_empty() {
                return Err(BridgeError::configuration("meter.host is required"));
            }
            if meter.timeout_ms == 0 {
                return Err(BridgeError::configuration("meter.timeout_ms must be positive"));
            }
        }
        Ok(())
    }
}
