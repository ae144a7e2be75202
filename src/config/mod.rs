//! Configuration loading.
//!
//! Sources, later ones winning:
//! 1. `config/default.{toml,yaml,json}` relative to the working directory, if present
//! 2. an explicit file passed by the caller, if any
//! 3. environment variables such as `TIERMQ_SERVER__PORT=1884`
//!
//! Whatever is still missing afterwards comes from [`Settings::default`].

mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

pub const ENV_PREFIX: &str = "TIERMQ";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Like [`load_config`], with an extra file layered over the default one.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
