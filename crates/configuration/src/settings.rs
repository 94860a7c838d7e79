use core_types::ContractTestSpec;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    /// The spec registry. When empty, the built-in platform registry is used.
    pub services: Vec<ServiceConfig>,
    pub diagnostics: DiagnosticsConfig,
    pub telegram: TelegramConfig,
    pub credentials: Option<ProbeCredentials>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

/// Settings shared by every per-service engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Interval of the supervisor poll loop.
    pub poll_interval_ms: u64,
    /// Delay before the automatic first batch after construction.
    pub initial_run_delay_ms: u64,
    /// Run each service's specs concurrently instead of in declaration order.
    pub parallel: bool,
    /// Directory holding the per-service result and override snapshots.
    pub snapshot_dir: PathBuf,
    /// Rolling result log size per service.
    pub result_cap: usize,
    /// Rolling latency samples kept per spec.
    pub history_cap: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            initial_run_delay_ms: 250,
            parallel: false,
            snapshot_dir: PathBuf::from(".sentinel"),
            result_cap: 600,
            history_cap: 60,
        }
    }
}

/// One probed service and its contract tests.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub specs: Vec<ContractTestSpec>,
}

impl ServiceConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Endpoints available to the ad-hoc diagnostics probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Endpoint name to absolute URL.
    pub endpoints: BTreeMap<String, String>,
    /// Samples retained per endpoint.
    pub sample_cap: usize,
    pub timeout_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            sample_cap: 100,
            timeout_ms: 10_000,
        }
    }
}

/// Credentials for the Telegram alert channel. Empty values disable it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

/// API key pair used to sign requests for specs marked `auth = true`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "sentinel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

impl Config {
    /// Rejects registries the engine cannot key unambiguously.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut service_ids = HashSet::new();
        for service in &self.services {
            if service.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "service id must not be empty".to_string(),
                ));
            }
            if !service_ids.insert(service.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
            if service.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "service '{}' has an empty base_url",
                    service.id
                )));
            }

            let mut spec_ids = HashSet::new();
            for spec in &service.specs {
                spec.validate().map_err(|e| {
                    ConfigError::ValidationError(format!("service '{}': {}", service.id, e))
                })?;
                if !spec_ids.insert(spec.id.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "service '{}' declares spec '{}' more than once",
                        service.id, spec.id
                    )));
                }
            }
        }

        if self.engine.history_cap == 0 || self.engine.result_cap == 0 {
            return Err(ConfigError::ValidationError(
                "result_cap and history_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
