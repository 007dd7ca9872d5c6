//! Driver capability interfaces and the demo driver implementations that
//! ship with the registry out of the box.

pub mod demo;
pub mod registry;

use async_trait::async_trait;

/// Failure surfaced by a driver during setup or an individual read/write.
/// The HAL core translates these into `HalError::DriverRead`/`DriverWrite`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError(message.into())
    }
}

/// Capability implemented by every thermometer driver.
#[async_trait]
pub trait Thermometer: Send + Sync {
    /// Returns the raw temperature reading, in the device's native units.
    /// Calibration-curve conversion (if configured) happens in the HAL core,
    /// not in the driver.
    async fn read_temperature(&self) -> Result<f64, DriverError>;
}

/// Capability implemented by every heater driver.
#[async_trait]
pub trait Heater: Send + Sync {
    /// Writes the heater output. The HAL core has already clamped `value` to
    /// `[0, max_value]` before calling this.
    async fn write_value(&self, value: f64) -> Result<(), DriverError>;

    async fn read_value(&self) -> Result<f64, DriverError>;
}

/// Extension of `Heater` for devices with an on/off latch in addition to
/// their continuous output.
#[async_trait]
pub trait SwitchableHeater: Heater {
    async fn set_enable(&self, enable: bool) -> Result<(), DriverError>;
    async fn get_enable(&self) -> Result<bool, DriverError>;
}

/// Parameter bag passed to a driver's `setup`, mirroring the Python
/// original's `**hw['setup']` keyword expansion.
pub type SetupParams = toml::value::Table;
