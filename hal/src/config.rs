//! Parses the HAL hardware configuration into typed entries.

use std::path::PathBuf;

use fridgeos_common::error::ConfigError;
use serde::Deserialize;

fn default_setup() -> toml::value::Table {
    toml::value::Table::new()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermometerConfig {
    pub name: String,
    pub hardware: String,
    #[serde(default = "default_setup")]
    pub setup: toml::value::Table,
    pub conversion_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaterConfig {
    pub name: String,
    pub hardware: String,
    #[serde(default = "default_setup")]
    pub setup: toml::value::Table,
    pub max_value: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawHardwareConfig {
    #[serde(default)]
    thermometers: Vec<ThermometerConfig>,
    #[serde(default)]
    heaters: Vec<HeaterConfig>,
}

#[derive(Debug, Default)]
pub struct HardwareConfig {
    pub thermometers: Vec<ThermometerConfig>,
    pub heaters: Vec<HeaterConfig>,
}

impl HardwareConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let raw: RawHardwareConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        check_unique_names("thermometers", raw.thermometers.iter().map(|t| &t.name))?;
        check_unique_names("heaters", raw.heaters.iter().map(|h| &h.name))?;

        Ok(HardwareConfig {
            thermometers: raw.thermometers,
            heaters: raw.heaters,
        })
    }
}

fn check_unique_names<'a>(
    section: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName {
                section: section.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_duplicate_thermometer_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[thermometers]]
            name = "4K"
            hardware = "demo-thermometer"

            [[thermometers]]
            name = "4K"
            hardware = "demo-thermometer"
            "#
        )
        .unwrap();

        let result = HardwareConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::DuplicateName { .. })));
    }

    #[test]
    fn loads_thermometers_and_heaters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[thermometers]]
            name = "4K"
            hardware = "demo-thermometer"

            [[heaters]]
            name = "PUMPHEATER"
            hardware = "demo-heater"
            max_value = 25.0
            "#
        )
        .unwrap();

        let config = HardwareConfig::load(file.path()).unwrap();
        assert_eq!(config.thermometers.len(), 1);
        assert_eq!(config.heaters.len(), 1);
        assert_eq!(config.heaters[0].max_value, 25.0);
    }
}
