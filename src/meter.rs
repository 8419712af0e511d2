//! # Meter reader
//!
//! Reads grid meter values over the register protocol and merges them into
//! the device status store at the end of each gateway sweep.
//!
//! Reads are issued one after another, never concurrently. A failed cycle
//! drops the connection, waits the retry backoff and tries once more before
//! giving up; the caller then skips augmentation for that sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::catalog::RegisterCatalog;
use crate::client::RegisterRead;
use crate::codec::decode_words;
use crate::constants::{DEFAULT_RETRY_BACKOFF_MS, METER_READ_ATTEMPTS};
use crate::error::{BridgeError, BridgeResult};
use crate::register_map::{InverterClass, RegisterMap, RegisterMapResolver};
use crate::store::{sanitize, DeviceRecord, DeviceStatusStore};

pub const METER_POWER: &str = "meter_power";
pub const GRID_IMPORT_ENERGY: &str = "grid_import_energy";
pub const GRID_EXPORT_ENERGY: &str = "grid_export_energy";

pub const INTERNAL_TEMPERATURE: &str = "internal_temperature";
pub const BATTERY_LEVEL: &str = "battery_level";

/// Metrics re-read by the health check. Unmapped ones are skipped.
pub const HEALTH_CHECK_METRICS: [&str; 5] = [
    METER_POWER,
    GRID_IMPORT_ENERGY,
    GRID_EXPORT_ENERGY,
    INTERNAL_TEMPERATURE,
    BATTERY_LEVEL,
];

/// Point names written by augmentation.
pub const METER_POWER_POINT: &str = "Meter Active Power";
pub const GRID_IMPORT_POINT: &str = "Grid Import Energy";
pub const GRID_EXPORT_POINT: &str = "Grid Export Energy";

/// One meter read cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterData {
    pub power_w: f64,
    pub import_kwh: f64,
    pub export_kwh: f64,
}

/// A health-check reading outside its category range.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthViolation {
    pub metric_id: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Register client plus the resolved register map of the active deployment.
pub struct MeterReader<C: RegisterRead> {
    client: C,
    catalog: Arc<RegisterCatalog>,
    resolver: RegisterMapResolver,
    map: RegisterMap,
    model: Option<String>,
    class: Option<InverterClass>,
    class_override: Option<InverterClass>,
    resolved: bool,
    target_serial: Option<String>,
    retry_backoff: Duration,
}

impl<C: RegisterRead> MeterReader<C> {
    /// Wrap `client`. The map starts as a read-only preview without model
    /// or class; the first [`select_model`](Self::select_model) resolves and
    /// persists it.
    pub fn new(client: C, resolver: RegisterMapResolver) -> BridgeResult<Self> {
        let map = resolver.preview(None, None)?;
        Ok(Self {
            client,
            catalog: Arc::clone(resolver.catalog()),
            resolver,
            map,
            model: None,
            class: None,
            class_override: None,
            resolved: false,
            target_serial: None,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Serial of the device that receives meter points.
    pub fn with_target_serial(mut self, serial: impl AsRef<str>) -> Self {
        self.target_serial = Some(sanitize(serial.as_ref()));
        self
    }

    /// Use `class` for generated defaults regardless of the device type.
    pub fn with_inverter_class(mut self, class: InverterClass) -> Self {
        self.class_override = Some(class);
        self
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Drop the register link; the next read reconnects.
    pub async fn disconnect(&mut self) -> BridgeResult<()> {
        self.client.disconnect().await
    }

    /// Re-resolve the register map when model or class changed.
    pub fn select_model(
        &mut self,
        model: Option<&str>,
        class: Option<InverterClass>,
    ) -> BridgeResult<()> {
        if self.resolved && self.model.as_deref() == model && self.class == class {
            return Ok(());
        }
        self.map = self.resolver.resolve(model, class)?;
        self.model = model.map(str::to_string);
        self.class = class;
        self.resolved = true;
        info!(
            "Register map resolved for model {:?}, class {:?}: {} metrics",
            self.model,
            self.class,
            self.map.len()
        );
        Ok(())
    }

    /// Read and decode one metric.
    pub async fn read_metric(&mut self, id: &str) -> BridgeResult<f64> {
        let metric = self.catalog.require(id)?;
        let address = self.map.get(id).ok_or_else(|| {
            BridgeError::configuration(format!("No register resolved for metric {}", id))
        })?;
        let recipe = &metric.read;
        let words = self
            .client
            .read_registers(recipe.function, address, recipe.read_words())
            .await?;
        let value = decode_words(&words, recipe)?;
        debug!("{} @ {} = {}", id, address, value);
        Ok(value)
    }

    async fn read_cycle(&mut self) -> BridgeResult<MeterData> {
        let power_w = self.read_metric(METER_POWER).await?;
        let import_kwh = self.read_metric(GRID_IMPORT_ENERGY).await?;
        let export_kwh = self.read_metric(GRID_EXPORT_ENERGY).await?;
        Ok(MeterData {
            power_w,
            import_kwh,
            export_kwh,
        })
    }

    /// Power, import and export, with one reconnecting retry.
    pub async fn read_meter_data(&mut self) -> BridgeResult<MeterData> {
        let mut attempt = 1;
        loop {
            match self.read_cycle().await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < METER_READ_ATTEMPTS => {
                    warn!(
                        "Meter read attempt {}/{} failed: {}",
                        attempt, METER_READ_ATTEMPTS, e
                    );
                    if let Err(e) = self.client.disconnect().await {
                        debug!("Disconnect after failed read: {}", e);
                    }
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-read [`HEALTH_CHECK_METRICS`] and report values outside their
    /// category range. Never fails; read errors are logged.
    pub async fn health_check(&mut self) -> Vec<HealthViolation> {
        let mut violations = Vec::new();
        for id in HEALTH_CHECK_METRICS {
            let Some(range) = self.catalog.get(id).and_then(|m| m.category.health_range()) else {
                continue;
            };
            if self.map.get(id).is_none() {
                continue;
            }
            match self.read_metric(id).await {
                Ok(value) if value < range.0 || value > range.1 => {
                    warn!(
                        "Health check: {} = {} outside {}..{}, register mapping may be wrong",
                        id, value, range.0, range.1
                    );
                    violations.push(HealthViolation {
                        metric_id: id.to_string(),
                        value,
                        min: range.0,
                        max: range.1,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("Health check read of {} failed: {}", id, e),
            }
        }
        violations
    }

    /// Write meter points into the store of the target device: the
    /// configured serial, else the first device. Returns false when nothing
    /// was written.
    pub async fn augment(
        &mut self,
        devices: &[DeviceRecord],
        store: &mut DeviceStatusStore,
        now: DateTime<Utc>,
    ) -> bool {
        let target = match &self.target_serial {
            Some(serial) => devices.iter().find(|d| &d.serial_number == serial),
            None => devices.first(),
        };
        let Some(target) = target else {
            debug!("No target device for meter augmentation");
            return false;
        };

        let model = (!target.base_model.is_empty()).then_some(target.base_model.as_str());
        let class = self
            .class_override
            .or_else(|| InverterClass::from_device_type(target.type_code));
        if let Err(e) = self.select_model(model, class) {
            warn!("Register map resolution failed: {}", e);
            return false;
        }

        let data = match self.read_meter_data().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Skipping meter augmentation: {}", e);
                return false;
            }
        };

        let points = [
            (METER_POWER_POINT, METER_POWER, data.power_w, "W"),
            (GRID_IMPORT_POINT, GRID_IMPORT_ENERGY, data.import_kwh, "kWh"),
            (GRID_EXPORT_POINT, GRID_EXPORT_ENERGY, data.export_kwh, "kWh"),
        ];
        for (name, id, value, fallback_unit) in points {
            let unit = self
                .catalog
                .get(id)
                .and_then(|m| m.unit.as_deref())
                .unwrap_or(fallback_unit);
            store.update(&target.id, name, Some(value.into()), Some(unit), now);
        }
        true
    }
}

/// Run [`MeterReader::health_check`] every `period` until the task is aborted.
pub fn spawn_health_check<C>(reader: Arc<Mutex<MeterReader<C>>>, period: Duration) -> JoinHandle<()>
where
    C: RegisterRead + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let violations = reader.lock().await.health_check().await;
            if violations.is_empty() {
                debug!("Register health check passed");
            }
        }
    })
}
