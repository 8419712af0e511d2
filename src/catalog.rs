//! # Register Catalog
//!
//! Static metric definitions: what a metric is, how to decode it and where it
//! lives by default or on a given model. A catalog is loaded once, wrapped in
//! an `Arc` and handed to whoever needs it; it is never mutated afterwards.
//!
//! ## Format
//!
//! ```json
//! {
//!   "metrics": [
//!     {
//!       "id": "meter_power",
//!       "category": "power",
//!       "default": { "register": 5600 },
//!       "models": { "SG50RS": { "register": 5600 } },
//!       "read": { "function": "input", "words": 1, "type": "int16", "scale": 1 }
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::ReadRecipe;
use crate::error::{BridgeError, BridgeResult};

/// Catalog shipped with the crate.
const BUILTIN_CATALOG: &str = include_str!("../data/metric-definitions.json");

/// Physical quantity of a metric. Drives health-check bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Power,
    Energy,
    Voltage,
    Current,
    Frequency,
    ReactivePower,
    ReactiveEnergy,
    ApparentPower,
    Percentage,
    Temperature,
    Resistance,
    #[serde(other)]
    Other,
}

impl Category {
    /// Plausible range for a decoded value, if the category has one.
    pub fn health_range(&self) -> Option<(f64, f64)> {
        match self {
            // W
            Self::Power => Some((-200_000.0, 200_000.0)),
            // kWh, lifetime counters
            Self::Energy => Some((0.0, 100_000_000.0)),
            // ℃
            Self::Temperature => Some((-40.0, 120.0)),
            Self::Percentage => Some((0.0, 100.0)),
            _ => None,
        }
    }
}

/// Register slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<u16>,
}

/// Numeric bounds an operator-entered reference value should fall into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
}

/// Energy tolerance suggested for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyToleranceHint {
    pub absolute_kwh: f64,
    pub relative: f64,
}

/// How the discovery tool should treat a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryHint {
    /// power | energy | voltage | current | frequency
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_range: Option<ExpectedRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_watts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<EnergyToleranceHint>,
}

/// One metric of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default = "default_category")]
    pub category: Category,
    #[serde(default)]
    pub default: RegisterSlot,
    #[serde(default)]
    pub models: BTreeMap<String, RegisterSlot>,
    pub read: ReadRecipe,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryHint>,
}

fn default_category() -> Category {
    Category::Other
}

impl MetricDefinition {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Catalog register for `model`: the per-model entry if any, else the default.
    pub fn catalog_register(&self, model: Option<&str>) -> Option<u16> {
        model
            .and_then(|m| self.model_register(m))
            .or(self.default.register)
    }

    /// Per-model register; model keys compare case-insensitively.
    pub fn model_register(&self, model: &str) -> Option<u16> {
        self.models
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(model))
            .and_then(|(_, slot)| slot.register)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    metrics: Vec<MetricDefinition>,
}

/// Immutable set of metric definitions with id lookup.
#[derive(Debug, Clone)]
pub struct RegisterCatalog {
    metrics: Vec<MetricDefinition>,
    index: HashMap<String, usize>,
}

impl RegisterCatalog {
    /// Build from definitions, rejecting duplicates and empty reads.
    pub fn new(metrics: Vec<MetricDefinition>) -> BridgeResult<Self> {
        let mut index = HashMap::with_capacity(metrics.len());
        for (position, metric) in metrics.iter().enumerate() {
            if metric.read.words == 0 {
                return Err(BridgeError::configuration(format!(
                    "Metric {} reads zero words",
                    metric.id
                )));
            }
            if index.insert(metric.id.clone(), position).is_some() {
                return Err(BridgeError::configuration(format!(
                    "Duplicate metric id: {}",
                    metric.id
                )));
            }
        }
        Ok(Self { metrics, index })
    }

    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.metrics)
    }

    pub fn from_path(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// The catalog bundled with the crate.
    pub fn builtin() -> BridgeResult<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn get(&self, id: &str) -> Option<&MetricDefinition> {
        self.index.get(id).map(|&i| &self.metrics[i])
    }

    /// Like [`get`](Self::get) but an unknown id is an error.
    pub fn require(&self, id: &str) -> BridgeResult<&MetricDefinition> {
        self.get(id)
            .ok_or_else(|| BridgeError::UnknownMetric(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
