//! # Register Map Resolver
//!
//! Resolves every catalog metric to a register address for the active
//! deployment. Sources, lowest precedence first:
//!
//! 1. catalog default register
//! 2. catalog per-model register
//! 3. class-specific generated defaults, matched by metric name
//! 4. the persisted site override file
//!
//! The override file doubles as a calibration cache: every resolved metric it
//! does not list yet is appended, so it only ever grows. The file is rewritten
//! only when something in it actually changed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{MetricDefinition, RegisterCatalog};
use crate::error::{BridgeError, BridgeResult};
use crate::store::slugify;

/// Current override file layout version.
pub const OVERRIDE_FILE_VERSION: u32 = 1;

/// Inverter family used to pick generated defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InverterClass {
    String,
    Hybrid,
}

impl InverterClass {
    /// Class implied by a gateway device type code, when there is one.
    pub fn from_device_type(type_code: u32) -> Option<Self> {
        match type_code {
            21 => Some(Self::String),
            35 => Some(Self::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for InverterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "STRING"),
            Self::Hybrid => write!(f, "HYBRID"),
        }
    }
}

// ============================================================================
// Class defaults
// ============================================================================

/// One register row generated from a vendor register table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassRegister {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: u16,
    #[serde(default)]
    pub length: Option<u16>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassTable {
    #[serde(default)]
    registers: Vec<ClassRegister>,
}

#[derive(Debug, Deserialize)]
struct ClassDefaultsFile {
    inverter_types: HashMap<InverterClass, ClassTable>,
}

/// Generated per-class register tables, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct ClassRegisterDefaults {
    tables: HashMap<InverterClass, HashMap<String, u16>>,
}

impl ClassRegisterDefaults {
    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        let file: ClassDefaultsFile = serde_json::from_str(json)?;
        let mut tables = HashMap::new();
        for (class, table) in file.inverter_types {
            let mut by_name = HashMap::with_capacity(table.registers.len() * 2);
            for row in table.registers {
                // first row wins when two rows share a name
                if !row.id.is_empty() {
                    by_name.entry(slugify(&row.id)).or_insert(row.address);
                }
                if !row.name.is_empty() {
                    by_name.entry(slugify(&row.name)).or_insert(row.address);
                }
            }
            tables.insert(class, by_name);
        }
        Ok(Self { tables })
    }

    pub fn from_path(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path.as_ref())?)
    }

    /// Register for `metric` in the table of `class`, matched by id or name.
    pub fn lookup(&self, class: InverterClass, metric: &MetricDefinition) -> Option<u16> {
        let table = self.tables.get(&class)?;
        table
            .get(&slugify(&metric.id))
            .or_else(|| metric.name.as_deref().and_then(|n| table.get(&slugify(n))))
            .copied()
    }
}

// ============================================================================
// Register map
// ============================================================================

/// Metric id → register address for the active session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisterMap {
    entries: BTreeMap<String, u16>,
}

impl RegisterMap {
    pub fn get(&self, id: &str) -> Option<u16> {
        self.entries.get(id).copied()
    }

    pub fn insert(&mut self, id: impl Into<String>, register: u16) {
        self.entries.insert(id.into(), register);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.entries.iter().map(|(id, reg)| (id.as_str(), *reg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Override file
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub register: u16,
}

/// Site override file, always in the current versioned shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideFile {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub metrics: BTreeMap<String, OverrideEntry>,
}

impl Default for OverrideFile {
    fn default() -> Self {
        Self {
            version: OVERRIDE_FILE_VERSION,
            model: None,
            metrics: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOverrideFile {
    Versioned {
        #[serde(default)]
        version: Option<u32>,
        #[serde(default)]
        model: Option<String>,
        metrics: BTreeMap<String, OverrideEntry>,
    },
    Legacy(BTreeMap<String, u16>),
}

impl OverrideFile {
    /// Parse either layout. The flag is true when the input was the legacy
    /// flat `{id: register}` shape.
    pub fn parse(json: &str) -> BridgeResult<(Self, bool)> {
        let raw: RawOverrideFile = serde_json::from_str(json).map_err(|e| {
            BridgeError::invalid_data(format!("Unrecognized override file layout: {}", e))
        })?;
        Ok(match raw {
            RawOverrideFile::Versioned {
                version,
                model,
                metrics,
            } => (
                Self {
                    version: version.unwrap_or(OVERRIDE_FILE_VERSION),
                    model,
                    metrics,
                },
                false,
            ),
            RawOverrideFile::Legacy(flat) => (
                Self {
                    version: OVERRIDE_FILE_VERSION,
                    model: None,
                    metrics: flat
                        .into_iter()
                        .map(|(id, register)| (id, OverrideEntry { register }))
                        .collect(),
                },
                true,
            ),
        })
    }

    /// Load from disk; a missing file is an empty override set.
    pub fn load(path: &Path) -> BridgeResult<(Self, bool)> {
        match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok((Self::default(), false)),
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((Self::default(), false)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> BridgeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn register(&self, id: &str) -> Option<u16> {
        self.metrics.get(id).map(|e| e.register)
    }

    /// Set an entry, returning true if the file content changed.
    pub fn set(&mut self, id: &str, register: u16) -> bool {
        let entry = OverrideEntry { register };
        self.metrics.insert(id.to_string(), entry) != Some(entry)
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Merges catalog, class defaults and the override file into a [`RegisterMap`].
#[derive(Debug, Clone)]
pub struct RegisterMapResolver {
    catalog: Arc<RegisterCatalog>,
    class_defaults: Option<Arc<ClassRegisterDefaults>>,
    override_path: Option<PathBuf>,
}

impl RegisterMapResolver {
    pub fn new(catalog: Arc<RegisterCatalog>) -> Self {
        Self {
            catalog,
            class_defaults: None,
            override_path: None,
        }
    }

    pub fn with_class_defaults(mut self, defaults: Arc<ClassRegisterDefaults>) -> Self {
        self.class_defaults = Some(defaults);
        self
    }

    pub fn with_override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn catalog(&self) -> &Arc<RegisterCatalog> {
        &self.catalog
    }

    pub fn override_path(&self) -> Option<&Path> {
        self.override_path.as_deref()
    }

    /// Resolve all metrics for `model` / `class` and write back new entries.
    pub fn resolve(
        &self,
        model: Option<&str>,
        class: Option<InverterClass>,
    ) -> BridgeResult<RegisterMap> {
        let (mut overrides, legacy) = self.load_overrides()?;
        let map = self.merge(model, class, &overrides);

        if let Some(path) = &self.override_path {
            let mut changed = legacy;
            for (id, register) in map.iter() {
                if overrides.register(id).is_none() {
                    changed |= overrides.set(id, register);
                }
            }
            if overrides.model.is_none() {
                if let Some(model) = model {
                    overrides.model = Some(model.to_string());
                    changed = true;
                }
            }
            if changed {
                overrides.save(path)?;
                info!(
                    "Override file {} updated ({} metrics)",
                    path.display(),
                    overrides.metrics.len()
                );
            }
        }

        Ok(map)
    }

    /// Same precedence as [`resolve`](Self::resolve), but the override file
    /// is only read.
    pub fn preview(
        &self,
        model: Option<&str>,
        class: Option<InverterClass>,
    ) -> BridgeResult<RegisterMap> {
        let (overrides, _) = self.load_overrides()?;
        Ok(self.merge(model, class, &overrides))
    }

    fn load_overrides(&self) -> BridgeResult<(OverrideFile, bool)> {
        match &self.override_path {
            Some(path) => OverrideFile::load(path),
            None => Ok((OverrideFile::default(), false)),
        }
    }

    fn merge(
        &self,
        model: Option<&str>,
        class: Option<InverterClass>,
        overrides: &OverrideFile,
    ) -> RegisterMap {
        if let (Some(recorded), Some(requested)) = (overrides.model.as_deref(), model) {
            if !recorded.eq_ignore_ascii_case(requested) {
                warn!(
                    "Override file was calibrated for model {}, resolving for {}",
                    recorded, requested
                );
            }
        }

        let mut map = RegisterMap::default();
        for metric in self.catalog.iter() {
            let mut register = metric.catalog_register(model);
            if let (Some(class), Some(defaults)) = (class, &self.class_defaults) {
                if let Some(generated) = defaults.lookup(class, metric) {
                    register = Some(generated);
                }
            }
            if let Some(pinned) = overrides.register(&metric.id) {
                register = Some(pinned);
            }
            match register {
                Some(register) => map.insert(metric.id.clone(), register),
                None => debug!("No register known for metric {}", metric.id),
            }
        }
        map
    }

    /// Persist registers confirmed by discovery, replacing existing entries.
    /// Returns the number of entries that changed.
    pub fn record_discovered<'a>(
        &self,
        registers: impl IntoIterator<Item = (&'a str, u16)>,
    ) -> BridgeResult<usize> {
        let path = self
            .override_path
            .as_deref()
            .ok_or_else(|| BridgeError::configuration("No override file configured"))?;
        let (mut overrides, legacy) = OverrideFile::load(path)?;

        let mut changed = 0;
        for (id, register) in registers {
            self.catalog.require(id)?;
            if overrides.set(id, register) {
                changed += 1;
            }
        }
        if changed > 0 || legacy {
            overrides.save(path)?;
        }
        Ok(changed)
    }
}
