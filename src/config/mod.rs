//! Layered configuration: defaults, then an optional file, then environment.

mod settings;

use std::path::Path;

use config::{Config, Environment, File};

use crate::utils::{RelayError, Result};

pub use settings::{
    LoggingSettings, PartialSettings, RelaySettings, ServerSettings, Settings,
};

/// Environment variables are read as `TOPIC_RELAY__<SECTION>__<KEY>`.
pub const ENV_PREFIX: &str = "TOPIC_RELAY";

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands) and the environment, merged over `Settings::default()`.
pub fn load_config() -> Result<Settings> {
    load_config_from(None)
}

/// Like [`load_config`], but reads `path` instead of `config/default`. An
/// explicitly named file must exist.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    validate(&settings)?;
    Ok(settings)
}

/// Rejects values the relay cannot run with.
pub fn validate(settings: &Settings) -> Result<()> {
    let relay = &settings.relay;
    if relay.outbound_queue_capacity == 0 {
        return Err(RelayError::InvalidConfig(
            "relay.outbound_queue_capacity must be at least 1".to_string(),
        ));
    }
    if relay.max_connections == 0 {
        return Err(RelayError::InvalidConfig(
            "relay.max_connections must be at least 1".to_string(),
        ));
    }
    if relay.max_frame_bytes == 0 {
        return Err(RelayError::InvalidConfig(
            "relay.max_frame_bytes must be at least 1".to_string(),
        ));
    }
    Ok(())
}
