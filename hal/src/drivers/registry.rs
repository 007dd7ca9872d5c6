//! Process-wide mapping from driver-kind string to constructor. Seeded once
//! at HAL startup and read-only thereafter; looking up an unrecognized kind
//! during hardware load is a fatal `ConfigError::UnknownDriver`.

use std::collections::HashMap;
use std::sync::Arc;

use fridgeos_common::error::ConfigError;

use super::demo::{
    DemoHeater, DemoSwitchableHeater, DemoThermometer, FaultyDemoHeater, FaultyDemoThermometer,
    LaggyDemoThermometer,
};
use super::{DriverError, Heater, SetupParams, Thermometer};

type ThermometerFactory = Box<dyn Fn(&SetupParams) -> Result<Arc<dyn Thermometer>, DriverError> + Send + Sync>;
type HeaterFactory = Box<dyn Fn(&SetupParams) -> Result<Arc<dyn Heater>, DriverError> + Send + Sync>;

pub struct DriverRegistry {
    thermometers: HashMap<String, ThermometerFactory>,
    heaters: HashMap<String, HeaterFactory>,
}

impl DriverRegistry {
    /// Builds the registry with the demo drivers that ship out of the box.
    /// Real instrument drivers (serial/TCP) would be registered here the
    /// same way.
    pub fn with_demo_drivers() -> Self {
        let mut registry = DriverRegistry {
            thermometers: HashMap::new(),
            heaters: HashMap::new(),
        };

        registry.register_thermometer("demo-thermometer", |params| {
            Ok(Arc::new(DemoThermometer::new(params)))
        });
        registry.register_thermometer("demo-faulty-thermometer", |params| {
            Ok(Arc::new(FaultyDemoThermometer::new(params)))
        });
        registry.register_thermometer("demo-laggy-thermometer", |params| {
            Ok(Arc::new(LaggyDemoThermometer::new(params)))
        });

        registry.register_heater("demo-heater", |params| Ok(Arc::new(DemoHeater::new(params))));
        registry.register_heater("demo-faulty-heater", |params| {
            Ok(Arc::new(FaultyDemoHeater::new(params)))
        });
        registry.register_heater("demo-switchable-heater", |params| {
            Ok(Arc::new(DemoSwitchableHeater::new(params)))
        });

        registry
    }

    pub fn register_thermometer(
        &mut self,
        kind: &str,
        factory: impl Fn(&SetupParams) -> Result<Arc<dyn Thermometer>, DriverError> + Send + Sync + 'static,
    ) {
        self.thermometers.insert(kind.to_string(), Box::new(factory));
    }

    pub fn register_heater(
        &mut self,
        kind: &str,
        factory: impl Fn(&SetupParams) -> Result<Arc<dyn Heater>, DriverError> + Send + Sync + 'static,
    ) {
        self.heaters.insert(kind.to_string(), Box::new(factory));
    }

    pub fn build_thermometer(
        &self,
        name: &str,
        kind: &str,
        params: &SetupParams,
    ) -> Result<Arc<dyn Thermometer>, ConfigError> {
        let factory = self
            .thermometers
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownDriver {
                name: name.to_string(),
                kind: kind.to_string(),
            })?;
        factory(params).map_err(|e| ConfigError::UnknownDriver {
            name: name.to_string(),
            kind: format!("{kind} (setup failed: {e})"),
        })
    }

    pub fn build_heater(
        &self,
        name: &str,
        kind: &str,
        params: &SetupParams,
    ) -> Result<Arc<dyn Heater>, ConfigError> {
        let factory = self
            .heaters
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownDriver {
                name: name.to_string(),
                kind: kind.to_string(),
            })?;
        factory(params).map_err(|e| ConfigError::UnknownDriver {
            name: name.to_string(),
            kind: format!("{kind} (setup failed: {e})"),
        })
    }
}
