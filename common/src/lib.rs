pub mod client;
pub mod error;
pub mod logger;

pub use error::{AuthError, ConfigError, HalError};
pub use logger::FridgeLogger;
