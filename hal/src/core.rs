//! The HAL core: owns the device registry, exposes named read/write
//! operations, clamps writes to per-heater maxima, and isolates per-device
//! failures so one faulty thermometer cannot poison an aggregate read.

use std::collections::HashMap;
use std::sync::Arc;

use fridgeos_common::error::HalError;
use tokio::sync::Mutex;

use crate::calibration::{CalibrationCache, CalibrationTable};
use crate::config::HardwareConfig;
use crate::drivers::registry::DriverRegistry;
use crate::drivers::{Heater, Thermometer};

struct ThermometerEntry {
    driver: Arc<dyn Thermometer>,
    calibration: Option<CalibrationTable>,
    // Drivers are assumed non-reentrant; serialize per-device access.
    lock: Mutex<()>,
}

struct HeaterEntry {
    driver: Arc<dyn Heater>,
    max_value: f64,
    lock: Mutex<()>,
}

/// Owns every configured device for the process lifetime. Constructed once
/// at startup from configuration and never mutated afterward — the device
/// map itself is read-only, though each device's internal state is guarded
/// by its own per-device lock.
pub struct Hal {
    thermometers: HashMap<String, ThermometerEntry>,
    heaters: HashMap<String, HeaterEntry>,
}

impl Hal {
    pub fn build(
        config: &HardwareConfig,
        registry: &DriverRegistry,
        calibration_cache: &CalibrationCache,
    ) -> anyhow::Result<Self> {
        let mut thermometers = HashMap::new();
        for entry in &config.thermometers {
            let driver = registry.build_thermometer(&entry.name, &entry.hardware, &entry.setup)?;
            let calibration = match &entry.conversion_csv {
                Some(path) => Some(calibration_cache.get_or_load(path)?),
                None => None,
            };
            thermometers.insert(
                entry.name.clone(),
                ThermometerEntry {
                    driver,
                    calibration,
                    lock: Mutex::new(()),
                },
            );
        }

        let mut heaters = HashMap::new();
        for entry in &config.heaters {
            let driver = registry.build_heater(&entry.name, &entry.hardware, &entry.setup)?;
            heaters.insert(
                entry.name.clone(),
                HeaterEntry {
                    driver,
                    max_value: entry.max_value.max(0.0),
                    lock: Mutex::new(()),
                },
            );
        }

        Ok(Hal {
            thermometers,
            heaters,
        })
    }

    /// Reads a single thermometer. Driver failures are swallowed and the
    /// entry becomes `None`; only an unknown `name` is an error.
    pub async fn get_temperature(&self, name: &str) -> Result<Option<f64>, HalError> {
        let entry = self
            .thermometers
            .get(name)
            .ok_or_else(|| HalError::NotFound(name.to_string()))?;

        let _guard = entry.lock.lock().await;
        match entry.driver.read_temperature().await {
            Ok(raw) => {
                let value = match &entry.calibration {
                    Some(table) => table.convert(raw),
                    None => raw,
                };
                Ok(Some(value))
            }
            Err(e) => {
                log::error!("error reading temperature from {name}: {e}");
                Ok(None)
            }
        }
    }

    /// Aggregates `get_temperature` over every thermometer. A single faulty
    /// device never aborts the aggregate.
    pub async fn get_temperatures(&self) -> HashMap<String, Option<f64>> {
        let mut result = HashMap::with_capacity(self.thermometers.len());
        for name in self.thermometers.keys() {
            // `name` is known to exist, so NotFound cannot occur here.
            let value = self.get_temperature(name).await.unwrap_or(None);
            result.insert(name.clone(), value);
        }
        result
    }

    /// Clamps `value` to `[0, max_value]` (logging a WARN if it was out of
    /// range) then writes it. Returns the value actually written.
    pub async fn set_heater_value(&self, name: &str, value: f64) -> Result<f64, HalError> {
        let entry = self
            .heaters
            .get(name)
            .ok_or_else(|| HalError::NotFound(name.to_string()))?;

        let clamped = value.clamp(0.0, entry.max_value);
        if clamped != value {
            log::warn!(
                "heater {name} value {value} out of range [0, {}], clamping to {clamped}",
                entry.max_value
            );
        }

        let _guard = entry.lock.lock().await;
        entry
            .driver
            .write_value(clamped)
            .await
            .map_err(|e| HalError::DriverWrite {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(clamped)
    }

    /// Unlike `get_temperature`, driver failures are not swallowed here —
    /// read errors surface directly to the caller.
    pub async fn get_heater_value(&self, name: &str) -> Result<f64, HalError> {
        let entry = self
            .heaters
            .get(name)
            .ok_or_else(|| HalError::NotFound(name.to_string()))?;

        let _guard = entry.lock.lock().await;
        entry
            .driver
            .read_value()
            .await
            .map_err(|e| HalError::DriverRead {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn get_heater_values(&self) -> Result<HashMap<String, f64>, HalError> {
        let mut result = HashMap::with_capacity(self.heaters.len());
        for name in self.heaters.keys() {
            result.insert(name.clone(), self.get_heater_value(name).await?);
        }
        Ok(result)
    }

    pub fn get_heater_max_values(&self) -> HashMap<String, f64> {
        self.heaters
            .iter()
            .map(|(name, entry)| (name.clone(), entry.max_value))
            .collect()
    }

    pub fn thermometer_names(&self) -> Vec<String> {
        self.thermometers.keys().cloned().collect()
    }

    pub fn heater_names(&self) -> Vec<String> {
        self.heaters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaterConfig, ThermometerConfig};

    fn build_hal_with(
        thermometers: Vec<ThermometerConfig>,
        heaters: Vec<HeaterConfig>,
    ) -> Hal {
        let config = HardwareConfig {
            thermometers,
            heaters,
        };
        let registry = DriverRegistry::with_demo_drivers();
        let cache = CalibrationCache::new();
        Hal::build(&config, &registry, &cache).unwrap()
    }

    fn thermometer(name: &str, hardware: &str) -> ThermometerConfig {
        ThermometerConfig {
            name: name.to_string(),
            hardware: hardware.to_string(),
            setup: toml::value::Table::new(),
            conversion_csv: None,
        }
    }

    fn heater(name: &str, hardware: &str, max_value: f64) -> HeaterConfig {
        HeaterConfig {
            name: name.to_string(),
            hardware: hardware.to_string(),
            setup: toml::value::Table::new(),
            max_value,
        }
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let hal = build_hal_with(vec![], vec![]);
        assert!(matches!(
            hal.get_temperature("nope").await,
            Err(HalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn faulty_thermometer_does_not_poison_aggregate_reads() {
        let mut faulty_params = toml::value::Table::new();
        faulty_params.insert("fail_probability".to_string(), toml::Value::Float(1.0));
        let mut faulty = thermometer("stage3", "demo-faulty-thermometer");
        faulty.setup = faulty_params;

        let hal = build_hal_with(vec![thermometer("4K", "demo-thermometer"), faulty], vec![]);

        let temps = hal.get_temperatures().await;
        assert!(temps["4K"].is_some());
        assert_eq!(temps["stage3"], None);
    }

    #[tokio::test]
    async fn set_heater_value_clamps_to_max() {
        let hal = build_hal_with(vec![], vec![heater("PUMPHEATER", "demo-heater", 10.0)]);
        let written = hal.set_heater_value("PUMPHEATER", 25.0).await.unwrap();
        assert_eq!(written, 10.0);
        assert_eq!(hal.get_heater_value("PUMPHEATER").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn set_heater_value_clamps_negative_to_zero() {
        let hal = build_hal_with(vec![], vec![heater("PUMPHEATER", "demo-heater", 10.0)]);
        let written = hal.set_heater_value("PUMPHEATER", -5.0).await.unwrap();
        assert_eq!(written, 0.0);
    }

    struct AlwaysFailingReadHeater;

    #[async_trait::async_trait]
    impl Heater for AlwaysFailingReadHeater {
        async fn write_value(&self, _value: f64) -> Result<(), crate::drivers::DriverError> {
            Ok(())
        }

        async fn read_value(&self) -> Result<f64, crate::drivers::DriverError> {
            Err(crate::drivers::DriverError::new("stuck sensor"))
        }
    }

    #[tokio::test]
    async fn heater_read_failure_is_labeled_as_a_read_error() {
        let mut heaters = HashMap::new();
        heaters.insert(
            "BROKEN".to_string(),
            HeaterEntry {
                driver: Arc::new(AlwaysFailingReadHeater),
                max_value: 10.0,
                lock: Mutex::new(()),
            },
        );
        let hal = Hal {
            thermometers: HashMap::new(),
            heaters,
        };

        match hal.get_heater_value("BROKEN").await {
            Err(HalError::DriverRead { name, .. }) => assert_eq!(name, "BROKEN"),
            other => panic!("expected DriverRead, got {other:?}"),
        }
    }
}
