//! Configuration management
//!
//! Handles the daemon configuration (TOML or the legacy `key=value`
//! property file) and the front translator's policy file.

pub mod policy;
pub mod properties;
mod types;
mod validation;

pub use properties::{Properties, PropertyProvider};
pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Loads `path` as TOML when it ends in `.toml`, otherwise as a property
/// file (built-in defaults for `role` when missing).
pub fn load<P: AsRef<Path>>(path: P, role: Role) -> Result<Config> {
    let path = path.as_ref();
    if path.extension().is_some_and(|ext| ext == "toml") {
        load_toml(path)
    } else {
        let props = Properties::load_or_defaults(path, role);
        Ok(Config::from_properties(&props))
    }
}
