//! Simulated thermometer/heater drivers, grounded on the original's
//! `fridgeos/drivers/dummy.py` and the `Dummy*`/`Faulty*`/`Laggy*` entries in
//! `haldrivers.py`. Real instrument wire protocols (serial/TCP) are out of
//! scope; these are what the registry offers out of the box and what the
//! test suite exercises the per-device failure isolation against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use super::{DriverError, Heater, SetupParams, SwitchableHeater, Thermometer};

fn setup_f64(params: &SetupParams, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

/// Returns a reading that drifts slowly around a base value, standing in for
/// a real thermometer with thermal inertia.
pub struct DemoThermometer {
    base: f64,
    noise: f64,
    ticks: AtomicU64,
}

impl DemoThermometer {
    pub fn new(params: &SetupParams) -> Self {
        DemoThermometer {
            base: setup_f64(params, "base", 4.2),
            noise: setup_f64(params, "noise", 0.05),
            ticks: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Thermometer for DemoThermometer {
    async fn read_temperature(&self) -> Result<f64, DriverError> {
        let t = self.ticks.fetch_add(1, Ordering::Relaxed) as f64;
        let wobble = (t * 0.1).sin() * self.noise;
        Ok(self.base + wobble)
    }
}

/// Fails on a configurable fraction of reads (`fail_probability`, default
/// 10% per the original's `HAL_FaultyDummyThermometer`).
pub struct FaultyDemoThermometer {
    inner: DemoThermometer,
    fail_probability: f64,
}

impl FaultyDemoThermometer {
    pub fn new(params: &SetupParams) -> Self {
        FaultyDemoThermometer {
            inner: DemoThermometer::new(params),
            fail_probability: setup_f64(params, "fail_probability", 0.1),
        }
    }
}

#[async_trait]
impl Thermometer for FaultyDemoThermometer {
    async fn read_temperature(&self) -> Result<f64, DriverError> {
        if rand::thread_rng().gen::<f64>() < self.fail_probability {
            return Err(DriverError::new("faulty thermometer"));
        }
        self.inner.read_temperature().await
    }
}

/// Sleeps before returning, standing in for a device with slow I/O: ticks may
/// take longer than the configured polling interval under a slow device.
pub struct LaggyDemoThermometer {
    inner: DemoThermometer,
    delay: Duration,
}

impl LaggyDemoThermometer {
    pub fn new(params: &SetupParams) -> Self {
        let delay_secs = setup_f64(params, "delay_seconds", 7.0);
        LaggyDemoThermometer {
            inner: DemoThermometer::new(params),
            delay: Duration::from_secs_f64(delay_secs.max(0.0)),
        }
    }
}

#[async_trait]
impl Thermometer for LaggyDemoThermometer {
    async fn read_temperature(&self) -> Result<f64, DriverError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_temperature().await
    }
}

/// A heater whose output can be read back exactly as written.
pub struct DemoHeater {
    value: Mutex<f64>,
}

impl DemoHeater {
    pub fn new(_params: &SetupParams) -> Self {
        DemoHeater {
            value: Mutex::new(0.0),
        }
    }
}

#[async_trait]
impl Heater for DemoHeater {
    async fn write_value(&self, value: f64) -> Result<(), DriverError> {
        *self.value.lock().await = value;
        Ok(())
    }

    async fn read_value(&self) -> Result<f64, DriverError> {
        Ok(*self.value.lock().await)
    }
}

/// Fails on a configurable fraction of writes (default 10%, per
/// `HAL_FaultyDummyHeater`).
pub struct FaultyDemoHeater {
    inner: DemoHeater,
    fail_probability: f64,
}

impl FaultyDemoHeater {
    pub fn new(params: &SetupParams) -> Self {
        FaultyDemoHeater {
            inner: DemoHeater::new(params),
            fail_probability: setup_f64(params, "fail_probability", 0.1),
        }
    }
}

#[async_trait]
impl Heater for FaultyDemoHeater {
    async fn write_value(&self, value: f64) -> Result<(), DriverError> {
        if rand::thread_rng().gen::<f64>() < self.fail_probability {
            return Err(DriverError::new("faulty heater"));
        }
        self.inner.write_value(value).await
    }

    async fn read_value(&self) -> Result<f64, DriverError> {
        self.inner.read_value().await
    }
}

/// A heater with an on/off latch in addition to its continuous output. The
/// latch and the output value are independent: disabling the heater does not
/// clear the last written value, it only flips `get_enable`.
pub struct DemoSwitchableHeater {
    inner: DemoHeater,
    enabled: Mutex<bool>,
}

impl DemoSwitchableHeater {
    pub fn new(params: &SetupParams) -> Self {
        DemoSwitchableHeater {
            inner: DemoHeater::new(params),
            enabled: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Heater for DemoSwitchableHeater {
    async fn write_value(&self, value: f64) -> Result<(), DriverError> {
        self.inner.write_value(value).await
    }

    async fn read_value(&self) -> Result<f64, DriverError> {
        self.inner.read_value().await
    }
}

#[async_trait]
impl SwitchableHeater for DemoSwitchableHeater {
    async fn set_enable(&self, enable: bool) -> Result<(), DriverError> {
        *self.enabled.lock().await = enable;
        Ok(())
    }

    async fn get_enable(&self) -> Result<bool, DriverError> {
        Ok(*self.enabled.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_thermometer_reads_near_base() {
        let params = SetupParams::new();
        let thermo = DemoThermometer::new(&params);
        let reading = thermo.read_temperature().await.unwrap();
        assert!((reading - 4.2).abs() < 1.0);
    }

    #[tokio::test]
    async fn demo_heater_reads_back_what_was_written() {
        let params = SetupParams::new();
        let heater = DemoHeater::new(&params);
        heater.write_value(12.5).await.unwrap();
        assert_eq!(heater.read_value().await.unwrap(), 12.5);
    }

    #[tokio::test]
    async fn faulty_thermometer_always_fails_at_probability_one() {
        let mut params = SetupParams::new();
        params.insert("fail_probability".to_string(), toml::Value::Float(1.0));
        let thermo = FaultyDemoThermometer::new(&params);
        assert!(thermo.read_temperature().await.is_err());
    }

    #[tokio::test]
    async fn switchable_heater_latch_is_independent_of_value() {
        let params = SetupParams::new();
        let heater = DemoSwitchableHeater::new(&params);
        assert!(!heater.get_enable().await.unwrap());

        heater.write_value(5.0).await.unwrap();
        heater.set_enable(true).await.unwrap();
        assert!(heater.get_enable().await.unwrap());
        assert_eq!(heater.read_value().await.unwrap(), 5.0);

        heater.set_enable(false).await.unwrap();
        assert!(!heater.get_enable().await.unwrap());
        assert_eq!(heater.read_value().await.unwrap(), 5.0);
    }
}
