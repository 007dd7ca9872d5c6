//! Calibration tables: raw-sensor-reading -> physical-temperature conversion
//! via linear interpolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Two parallel sequences, `raw` guaranteed non-decreasing after loading.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    raw: Vec<f64>,
    temperature: Vec<f64>,
}

impl CalibrationTable {
    /// Loads a two-column CSV of `raw,temperature` pairs (optionally
    /// preceded by a header row, which is skipped if its first field does
    /// not parse as a float). If the raw axis is monotonically decreasing,
    /// both axes are reversed in place so interpolation always walks an
    /// ascending `raw` axis.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;

        let mut raw = Vec::new();
        let mut temperature = Vec::new();

        for record in reader.records() {
            let record = record?;
            if record.len() < 2 {
                continue;
            }
            let (Ok(r), Ok(t)) = (record[0].trim().parse::<f64>(), record[1].trim().parse::<f64>()) else {
                continue;
            };
            raw.push(r);
            temperature.push(t);
        }

        anyhow::ensure!(
            raw.len() >= 2,
            "calibration table {} needs at least two rows",
            path.display()
        );

        let decreasing = raw.windows(2).all(|w| w[0] >= w[1]);
        if decreasing {
            raw.reverse();
            temperature.reverse();
        }

        Ok(CalibrationTable { raw, temperature })
    }

    /// Converts a raw reading to temperature via linear interpolation.
    /// Values outside `[raw[0], raw[last]]` clamp to the nearest endpoint.
    /// A `NaN` reading converts to `NaN` rather than panicking.
    pub fn convert(&self, raw_value: f64) -> f64 {
        if raw_value.is_nan() {
            return f64::NAN;
        }

        let n = self.raw.len();

        if raw_value <= self.raw[0] {
            return self.temperature[0];
        }
        if raw_value >= self.raw[n - 1] {
            return self.temperature[n - 1];
        }

        let idx = match self.raw.binary_search_by(|probe| {
            probe.partial_cmp(&raw_value).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            Ok(i) => return self.temperature[i],
            Err(i) => i,
        };

        let (r0, r1) = (self.raw[idx - 1], self.raw[idx]);
        let (t0, t1) = (self.temperature[idx - 1], self.temperature[idx]);
        let frac = (raw_value - r0) / (r1 - r0);
        t0 + frac * (t1 - t0)
    }
}

/// Loads calibration tables lazily and caches them per file path, since the
/// same conversion CSV is often shared by several thermometers.
#[derive(Default)]
pub struct CalibrationCache {
    tables: Mutex<HashMap<PathBuf, CalibrationTable>>,
}

impl CalibrationCache {
    pub fn new() -> Self {
        CalibrationCache::default()
    }

    pub fn get_or_load(&self, path: &Path) -> anyhow::Result<CalibrationTable> {
        let mut tables = self.tables.lock().expect("calibration cache mutex poisoned");
        if let Some(table) = tables.get(path) {
            return Ok(table.clone());
        }
        let table = CalibrationTable::load(path)?;
        tables.insert(path.to_path_buf(), table.clone());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn interpolates_between_points() {
        let file = write_csv("1.0,4.0\n2.0,2.0\n");
        let table = CalibrationTable::load(file.path()).unwrap();
        assert!((table.convert(1.5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_below_range() {
        let file = write_csv("1.0,4.0\n2.0,2.0\n");
        let table = CalibrationTable::load(file.path()).unwrap();
        assert!((table.convert(0.5) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_above_range() {
        let file = write_csv("1.0,4.0\n2.0,2.0\n");
        let table = CalibrationTable::load(file.path()).unwrap();
        assert!((table.convert(2.5) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reverses_decreasing_raw_axis() {
        let file = write_csv("2.0,2.0\n1.0,4.0\n");
        let table = CalibrationTable::load(file.path()).unwrap();
        assert_eq!(table.raw, vec![1.0, 2.0]);
        assert_eq!(table.temperature, vec![4.0, 2.0]);
    }
}
