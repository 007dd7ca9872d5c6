use thiserror::Error;

/// Errors raised while loading a HAL or state-machine TOML configuration.
/// All of these are fatal at startup and abort the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate name {name:?} in {section} section")]
    DuplicateName { section: String, name: String },

    #[error("unknown driver kind {kind:?} for device {name:?}")]
    UnknownDriver { name: String, kind: String },

    #[error("unresolved constant or non-numeric token {token:?} in {context}")]
    UnresolvedConstant { token: String, context: String },

    #[error("state {state:?} referenced by transition {transition:?} does not exist")]
    UnknownState { state: String, transition: String },

    #[error("PID heater {heater:?} references unknown thermometer {thermometer:?}")]
    UnknownThermometer { heater: String, thermometer: String },

    #[error("invalid criterion {criterion:?}: {reason}")]
    InvalidCriterion { criterion: String, reason: String },
}

/// Per-request failures raised by the HAL core. These surface as HTTP status
/// codes at the HAL's HTTP boundary.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("device {0:?} not found")]
    NotFound(String),

    /// A device read that failed. Temperature reads swallow this internally
    /// and substitute `null`; a heater value read surfaces it directly to
    /// the caller.
    #[error("failed to read from device {name:?}: {reason}")]
    DriverRead { name: String, reason: String },

    /// A heater write that failed. Always surfaced to the caller.
    #[error("failed to write device {name:?}: {reason}")]
    DriverWrite { name: String, reason: String },
}

/// Authentication failure on a password-gated control-surface endpoint.
#[derive(Debug, Error)]
#[error("invalid or missing password")]
pub struct AuthError;
