use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
#[cfg(feature = "clap")]
pub mod cli;
pub mod error;
pub mod logging;
pub mod registry;
pub mod settings;

// Re-export the core types to provide a clean public API.
#[cfg(feature = "clap")]
pub use cli::ConfigArgs;
pub use logging::init_logging;
pub use registry::default_services;
pub use settings::{
    Config, DiagnosticsConfig, EngineSettings, LoggingConfig, ProbeCredentials, ServerConfig,
    ServiceConfig, TelegramConfig,
};

/// Prefix for environment overrides, e.g. `SENTINEL__ENGINE__PARALLEL=true`.
const ENV_PREFIX: &str = "SENTINEL";

/// Loads the application configuration.
///
/// Reads the TOML file at `path` if it exists, layers `SENTINEL__*` environment
/// variables on top, deserializes the result into our strongly-typed `Config`
/// and validates it. An empty service list is replaced with the built-in
/// platform registry.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    finish(builder.try_deserialize::<Config>()?)
}

/// Parses configuration from an in-memory TOML document.
pub fn load_config_from_str(toml: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    finish(builder.try_deserialize::<Config>()?)
}

fn finish(mut config: Config) -> Result<Config, ConfigError> {
    if config.services.is_empty() {
        tracing::info!("No services configured; using the built-in platform registry.");
        config.services = default_services();
    }
    config.validate()?;
    Ok(config)
}
