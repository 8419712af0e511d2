//! # Device Status Store
//!
//! Devices seen by the gateway session and their latest data points. The
//! session and the meter augmentation write into it; the publisher reads the
//! dirty points and acknowledges them with [`DeviceStatusStore::mark_delivered`].
//!
//! A point is rewritten only when its value changed or the previous write is
//! at least [`STALE_REFRESH_SECS`] old, so an idle device still refreshes
//! downstream periodically without flooding it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::STALE_REFRESH_SECS;

/// Stable key for a display name: lower-case, runs of anything that is not
/// ASCII alphanumeric collapsed to `_`, no leading or trailing `_`.
///
/// ```
/// use winet_bridge::store::slugify;
/// assert_eq!(slugify("MPPT1 Voltage"), "mppt1_voltage");
/// assert_eq!(slugify("  Total  DC-Power (kW) "), "total_dc_power_kw");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Keep only ASCII alphanumerics.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Model family used for register-map selection: text before the first
/// `-`, `_` or space, sanitized and upper-cased.
pub fn base_model(model: &str) -> String {
    let head = model
        .trim()
        .split(['-', '_', ' '])
        .next()
        .unwrap_or_default();
    sanitize(head).to_ascii_uppercase()
}

/// A device listed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Store key, the sanitized serial number
    pub id: String,
    /// Identifier the gateway expects in per-device requests
    pub gateway_id: String,
    pub serial_number: String,
    pub model_name: String,
    pub base_model: String,
    pub type_code: u32,
}

impl DeviceRecord {
    pub fn new(gateway_id: impl Into<String>, serial: &str, model: &str, type_code: u32) -> Self {
        let serial_number = sanitize(serial);
        Self {
            id: serial_number.clone(),
            gateway_id: gateway_id.into(),
            serial_number,
            model_name: sanitize(model),
            base_model: base_model(model),
            type_code,
        }
    }
}

/// Value of a data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Number(f64),
    Text(String),
}

impl PointValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Equality for dedup: NaN equals NaN.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

fn same_value(a: &Option<PointValue>, b: &Option<PointValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same_as(b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for PointValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PointValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One named value of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    pub slug: String,
    /// `None` when the device reported the value as unavailable
    pub value: Option<PointValue>,
    pub unit: Option<String>,
    /// Not yet delivered downstream
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
}

/// Device id → slug → data point.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatusStore {
    devices: BTreeMap<String, BTreeMap<String, DataPoint>>,
}

impl DeviceStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a point unless it holds the same value and was written less than
    /// [`STALE_REFRESH_SECS`] ago. Returns true when the point was written.
    pub fn update(
        &mut self,
        device_id: &str,
        name: &str,
        value: Option<PointValue>,
        unit: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let slug = slugify(name);
        let points = self.devices.entry(device_id.to_string()).or_default();

        if let Some(existing) = points.get(&slug) {
            let fresh = now - existing.updated_at < Duration::seconds(STALE_REFRESH_SECS);
            if fresh && same_value(&existing.value, &value) {
                return false;
            }
        }

        points.insert(
            slug.clone(),
            DataPoint {
                name: name.to_string(),
                slug,
                value,
                unit: unit.filter(|u| !u.is_empty()).map(str::to_string),
                dirty: true,
                updated_at: now,
            },
        );
        true
    }

    pub fn device(&self, device_id: &str) -> Option<&BTreeMap<String, DataPoint>> {
        self.devices.get(device_id)
    }

    pub fn point(&self, device_id: &str, slug: &str) -> Option<&DataPoint> {
        self.devices.get(device_id)?.get(slug)
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Points of `device_id` not yet delivered.
    pub fn dirty_points(&self, device_id: &str) -> impl Iterator<Item = &DataPoint> {
        self.devices
            .get(device_id)
            .into_iter()
            .flat_map(|points| points.values())
            .filter(|p| p.dirty)
    }

    pub fn dirty_count(&self) -> usize {
        self.devices
            .values()
            .flat_map(|points| points.values())
            .filter(|p| p.dirty)
            .count()
    }

    /// Clear the dirty flag of one point. Returns false if it does not exist.
    pub fn mark_delivered(&mut self, device_id: &str, slug: &str) -> bool {
        match self.devices.get_mut(device_id).and_then(|p| p.get_mut(slug)) {
            Some(point) => {
                point.dirty = false;
                true
            }
            None => false,
        }
    }

    /// Clear every dirty flag of one device.
    pub fn mark_device_delivered(&mut self, device_id: &str) {
        if let Some(points) = self.devices.get_mut(device_id) {
            points.values_mut().for_each(|p| p.dirty = false);
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
