//! Parses the state-machine TOML configuration into resolved entities:
//! constants, settings, heaters, states, transitions. Constant tokens in
//! states and criteria are substituted with their numeric value at load
//! time; a synthetic `PAUSED` state is appended if the document doesn't
//! declare one.

use std::collections::HashMap;

use fridgeos_common::error::ConfigError;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::model::{Criterion, HeaterMode, HeaterSpec, Op, State, Transition, PAUSED};

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    fridge_name: Option<String>,
    polling_interval: Option<f64>,
    state_change_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPidCoefficients {
    #[serde(rename = "P", default)]
    p: f64,
    #[serde(rename = "I", default)]
    i: f64,
    #[serde(rename = "D", default)]
    d: f64,
    max_value: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawHeater {
    corresponding_thermometer: Option<String>,
    pid_coefficients: Option<RawPidCoefficients>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFrom {
    Single(String),
    Many(Vec<String>),
}

impl RawFrom {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawFrom::Single(s) => vec![s],
            RawFrom::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTransition {
    from: RawFrom,
    to: String,
    #[serde(default)]
    criteria: Vec<String>,
    max_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    constants: HashMap<String, toml::Value>,
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    heaters: IndexMap<String, RawHeater>,
    #[serde(default)]
    states: IndexMap<String, IndexMap<String, toml::Value>>,
    #[serde(default)]
    transitions: Vec<RawTransition>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub fridge_name: String,
    pub polling_interval: f64,
    pub state_change_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmConfig {
    pub settings: Settings,
    pub heaters: Vec<HeaterSpec>,
    pub states: IndexMap<String, State>,
    pub transitions: Vec<Transition>,
}

impl SmConfig {
    pub fn load(path: &std::path::Path, default_polling_interval: f64) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let constants = resolve_constants(&raw.constants);

        let settings = Settings {
            fridge_name: raw.settings.fridge_name.unwrap_or_else(|| "FridgeOS".to_string()),
            polling_interval: raw.settings.polling_interval.unwrap_or(default_polling_interval),
            state_change_password: raw.settings.state_change_password,
        };

        let heaters = raw
            .heaters
            .into_iter()
            .map(|(name, heater)| resolve_heater(name, heater))
            .collect::<Result<Vec<_>, _>>()?;

        let mut states: IndexMap<String, State> = raw
            .states
            .into_iter()
            .map(|(name, targets)| resolve_state(&constants, name, targets))
            .collect::<Result<IndexMap<_, _>, _>>()?;

        states
            .entry(PAUSED.to_string())
            .or_insert_with(|| State {
                name: PAUSED.to_string(),
                targets: HashMap::new(),
            });

        let transitions = raw
            .transitions
            .into_iter()
            .map(|t| resolve_transition(&constants, t))
            .collect::<Result<Vec<_>, _>>()?;

        for transition in &transitions {
            for from in &transition.from {
                if !states.contains_key(from) {
                    return Err(ConfigError::UnknownState {
                        state: from.clone(),
                        transition: transition.to.clone(),
                    });
                }
            }
            if !states.contains_key(&transition.to) {
                return Err(ConfigError::UnknownState {
                    state: transition.to.clone(),
                    transition: transition.to.clone(),
                });
            }
        }

        Ok(SmConfig {
            settings,
            heaters,
            states,
            transitions,
        })
    }
}

fn resolve_constants(raw: &HashMap<String, toml::Value>) -> HashMap<String, f64> {
    raw.iter()
        .filter_map(|(k, v)| toml_value_as_f64(v).map(|n| (k.clone(), n)))
        .collect()
}

fn toml_value_as_f64(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn resolve_heater(name: String, raw: RawHeater) -> Result<HeaterSpec, ConfigError> {
    let mode = match raw.pid_coefficients {
        Some(pid) => {
            let corresponding_thermometer =
                raw.corresponding_thermometer.ok_or_else(|| ConfigError::InvalidCriterion {
                    criterion: name.clone(),
                    reason: "PID heater missing corresponding_thermometer".to_string(),
                })?;
            HeaterMode::Pid {
                p: pid.p,
                i: pid.i,
                d: pid.d,
                max_value: pid.max_value,
                corresponding_thermometer,
            }
        }
        None => HeaterMode::Direct,
    };

    Ok(HeaterSpec { name, mode })
}

fn resolve_state(
    constants: &HashMap<String, f64>,
    name: String,
    targets: IndexMap<String, toml::Value>,
) -> Result<(String, State), ConfigError> {
    let mut resolved = HashMap::with_capacity(targets.len());
    for (key, value) in targets {
        let number = resolve_token(constants, &value, &format!("states.{name}.{key}"))?;
        resolved.insert(key, number);
    }
    Ok((
        name.clone(),
        State {
            name,
            targets: resolved,
        },
    ))
}

fn resolve_token(
    constants: &HashMap<String, f64>,
    value: &toml::Value,
    context: &str,
) -> Result<f64, ConfigError> {
    match value {
        toml::Value::Float(f) => Ok(*f),
        toml::Value::Integer(i) => Ok(*i as f64),
        toml::Value::String(token) => constants.get(token).copied().ok_or_else(|| {
            ConfigError::UnresolvedConstant {
                token: token.clone(),
                context: context.to_string(),
            }
        }),
        other => Err(ConfigError::UnresolvedConstant {
            token: other.to_string(),
            context: context.to_string(),
        }),
    }
}

fn resolve_transition(
    constants: &HashMap<String, f64>,
    raw: RawTransition,
) -> Result<Transition, ConfigError> {
    let criteria = raw
        .criteria
        .iter()
        .map(|c| parse_criterion(constants, c))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Transition {
        from: raw.from.into_vec(),
        to: raw.to,
        criteria,
        max_seconds: raw.max_seconds,
    })
}

fn parse_criterion(constants: &HashMap<String, f64>, text: &str) -> Result<Criterion, ConfigError> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [sensor, op, value_token] = parts[..] else {
        return Err(ConfigError::InvalidCriterion {
            criterion: text.to_string(),
            reason: "expected exactly three whitespace-separated tokens".to_string(),
        });
    };

    let op = match op {
        "<" => Op::Less,
        ">" => Op::Greater,
        other => {
            return Err(ConfigError::InvalidCriterion {
                criterion: text.to_string(),
                reason: format!("unknown operator {other:?}"),
            })
        }
    };

    let value = if let Some(constant) = constants.get(value_token) {
        *constant
    } else {
        value_token.parse::<f64>().map_err(|_| ConfigError::InvalidCriterion {
            criterion: text.to_string(),
            reason: format!("{value_token:?} is neither a constant nor a number"),
        })?
    };

    Ok(Criterion {
        sensor: sensor.to_string(),
        op,
        value,
    })
}
