//! Gateway session messages.
//!
//! Outbound: `{lang, token, service, ...fields}`.
//! Inbound: `{result_code, result_msg, result_data: {service, ...}}`.
//!
//! Inbound dispatch happens in two steps: the envelope and its `service` tag
//! are parsed first, the service payload second. A malformed payload is then
//! still attributable to its service, which decides whether the failure
//! costs the whole session or only one update.

use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::RESULT_CODE_SUCCESS;
use crate::error::{BridgeError, BridgeResult};

/// Requests the bridge sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "service")]
pub enum Request {
    #[serde(rename = "connect")]
    Connect { username: String, passwd: String },
    #[serde(rename = "login")]
    Login { username: String, passwd: String },
    #[serde(rename = "devicelist")]
    DeviceList {
        #[serde(rename = "type")]
        list_type: String,
        is_check_token: String,
    },
    #[serde(rename = "real")]
    Real { dev_id: String, time123456: i64 },
    #[serde(rename = "direct")]
    Direct { dev_id: String, time123456: i64 },
    #[serde(rename = "real_battery")]
    RealBattery { dev_id: String, time123456: i64 },
}

impl Request {
    pub fn device_list() -> Self {
        Self::DeviceList {
            list_type: "0".to_string(),
            is_check_token: "0".to_string(),
        }
    }

    pub fn service(&self) -> Service {
        match self {
            Self::Connect { .. } => Service::Connect,
            Self::Login { .. } => Service::Login,
            Self::DeviceList { .. } => Service::DeviceList,
            Self::Real { .. } => Service::Real,
            Self::Direct { .. } => Service::Direct,
            Self::RealBattery { .. } => Service::RealBattery,
        }
    }
}

/// A request wrapped in the session envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outbound {
    pub lang: String,
    pub token: String,
    #[serde(flatten)]
    pub request: Request,
}

impl Outbound {
    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Service tag of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Service {
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "devicelist")]
    DeviceList,
    #[serde(rename = "real")]
    Real,
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "real_battery")]
    RealBattery,
    #[serde(rename = "notice")]
    Notice,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Login => "login",
            Self::DeviceList => "devicelist",
            Self::Real => "real",
            Self::Direct => "direct",
            Self::RealBattery => "real_battery",
            Self::Notice => "notice",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct RawInbound {
    result_code: i64,
    #[serde(default)]
    result_msg: String,
    #[serde(default)]
    result_data: Value,
}

#[derive(Debug, Deserialize)]
struct ServiceTag {
    service: Service,
}

/// A parsed inbound envelope; the payload is decoded on demand.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub result_code: i64,
    pub result_msg: String,
    pub service: Service,
    data: Value,
}

impl Inbound {
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let raw: RawInbound = serde_json::from_str(text)?;
        let service = match ServiceTag::deserialize(&raw.result_data) {
            Ok(tag) => tag.service,
            Err(_) => Service::Unknown,
        };
        Ok(Self {
            result_code: raw.result_code,
            result_msg: raw.result_msg,
            service,
            data: raw.result_data,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_CODE_SUCCESS
    }

    /// Decode the service payload.
    pub fn payload<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        T::deserialize(&self.data).map_err(|e| {
            BridgeError::invalid_data(format!("Malformed {} reply: {}", self.service, e))
        })
    }
}

/// Gateway firmware generation, inferred from the connect reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    Gen1,
    Gen2,
    Gen3,
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectReply {
    #[serde(default)]
    pub token: String,
    #[serde(rename = "forceModifyPasswd", default)]
    pub force_modify_passwd: Option<Value>,
    #[serde(default)]
    pub tips_disable: Option<Value>,
    #[serde(default)]
    pub virgin_flag: Option<Value>,
}

impl ConnectReply {
    pub fn generation(&self) -> ProtocolGeneration {
        if self.force_modify_passwd.is_some() {
            ProtocolGeneration::Gen3
        } else if self.tips_disable.is_some() {
            ProtocolGeneration::Gen2
        } else if self.virgin_flag.is_some() {
            ProtocolGeneration::Gen1
        } else {
            ProtocolGeneration::Unknown
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginReply {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub dev_id: String,
    #[serde(default)]
    pub dev_sn: String,
    #[serde(default)]
    pub dev_model: String,
    pub dev_type: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListReply {
    pub list: Vec<DeviceEntry>,
}

/// One value of a `real` or `real_battery` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RealEntry {
    pub data_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub data_value: String,
    #[serde(default)]
    pub data_unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealReply {
    pub list: Vec<RealEntry>,
}

/// One string/MPPT element of a `direct` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectEntry {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub voltage: String,
    #[serde(default = "volt")]
    pub voltage_unit: String,
    #[serde(deserialize_with = "string_or_number")]
    pub current: String,
    #[serde(default = "ampere")]
    pub current_unit: String,
}

fn volt() -> String {
    "V".to_string()
}

fn ampere() -> String {
    "A".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectReply {
    pub list: Vec<DirectEntry>,
}

/// Accept `"12"` and `12` alike.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
