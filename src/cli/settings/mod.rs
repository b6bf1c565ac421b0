//! Settings management for CLI set/unset commands.
//!
//! Each configuration key has a [`SettingHandler`]; the registry maps the
//! user-facing key (`api-key`, `temperature`, ...) to its handler. Changes
//! are applied to a freshly loaded config and saved right away.

pub mod error;
pub mod handlers;
pub mod registry;

pub use error::SettingError;
pub use registry::SettingRegistry;

use std::path::Path;

use crate::core::config::data::Config;

/// Trait for handling a configuration setting.
pub trait SettingHandler: Send + Sync {
    /// Returns the configuration key this handler manages.
    fn key(&self) -> &'static str;

    /// Set the configuration value from the arguments after the key.
    ///
    /// Returns a success message to display.
    fn set(&self, args: &[String], config: &mut Config) -> Result<String, SettingError>;

    /// Reset the value to its default and return a success message.
    fn unset(&self, config: &mut Config) -> String;
}

fn load_for_update(config_path: &Path) -> Result<Config, SettingError> {
    Config::load_from_path(config_path)
        .map(Option::unwrap_or_default)
        .map_err(|err| SettingError::ConfigError(err.to_string()))
}

fn save(config: &Config, config_path: &Path) -> Result<(), SettingError> {
    config
        .save_to_path(config_path)
        .map_err(|err| SettingError::ConfigError(err.to_string()))
}

/// Set `key` in the config file at `config_path`.
///
/// An unreadable existing file is reported instead of overwritten.
pub fn set_value(
    registry: &SettingRegistry,
    config_path: &Path,
    key: &str,
    args: &[String],
) -> Result<String, SettingError> {
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    let mut config = load_for_update(config_path)?;
    let message = handler.set(args, &mut config)?;
    save(&config, config_path)?;
    Ok(message)
}

pub fn unset_value(
    registry: &SettingRegistry,
    config_path: &Path,
    key: &str,
) -> Result<String, SettingError> {
    let handler = registry
        .get(key)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))?;
    let mut config = load_for_update(config_path)?;
    let message = handler.unset(&mut config);
    save(&config, config_path)?;
    Ok(message)
}
