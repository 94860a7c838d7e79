use crate::enums::{HttpMethod, JsonType};
use crate::error::CoreError;
use crate::schema::DeepSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Soft latency budget assumed when a spec does not declare one.
pub const DEFAULT_MAX_LATENCY_MS: u64 = 5_000;

/// The HTTP status code(s) a spec accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    One(u16),
    AnyOf(Vec<u16>),
}

impl ExpectedStatus {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            ExpectedStatus::One(code) => *code == status,
            ExpectedStatus::AnyOf(codes) => codes.contains(&status),
        }
    }
}

impl Default for ExpectedStatus {
    fn default() -> Self {
        ExpectedStatus::One(200)
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::One(code) => write!(f, "{}", code),
            ExpectedStatus::AnyOf(codes) => {
                let joined: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
                write!(f, "[{}]", joined.join(","))
            }
        }
    }
}

/// Parameters for the per-spec circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive fail/error results that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before the next probe is let through.
    pub cooldown_ms: u64,
}

/// Whether a spec should run.
///
/// Config files can express the static flag or an environment-variable gate.
/// Programmatic callers can supply a predicate that is evaluated on every run.
#[derive(Clone)]
pub enum Enabled {
    Static(bool),
    /// Enabled when the variable is set to anything other than `0`, `false` or an empty string.
    Env(String),
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Enabled {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Enabled::Predicate(Arc::new(f))
    }

    pub fn resolve(&self) -> bool {
        match self {
            Enabled::Static(flag) => *flag,
            Enabled::Env(var) => match std::env::var(var) {
                Ok(value) => {
                    let value = value.trim().to_ascii_lowercase();
                    !(value.is_empty() || value == "0" || value == "false")
                }
                Err(_) => false,
            },
            Enabled::Predicate(f) => f(),
        }
    }
}

impl Default for Enabled {
    fn default() -> Self {
        Enabled::Static(true)
    }
}

impl fmt::Debug for Enabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Enabled::Static(flag) => f.debug_tuple("Static").field(flag).finish(),
            Enabled::Env(var) => f.debug_tuple("Env").field(var).finish(),
            Enabled::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for Enabled {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Env { env: String },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(flag) => Enabled::Static(flag),
            Repr::Env { env } => Enabled::Env(env),
        })
    }
}

/// A declarative contract test for one endpoint of a service.
///
/// Specs are immutable once handed to the engine; runtime tuning goes through
/// [`SpecOverride`], which is merged onto a copy before each run.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractTestSpec {
    /// Unique within a service. History and breaker state are keyed by it.
    pub id: String,
    pub label: String,
    /// Absolute URL, or a path relative to the service base URL.
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub expected_status: ExpectedStatus,
    /// Soft budget. Exceeding it only annotates a passing result.
    pub max_latency_ms: Option<u64>,
    /// Contractual budget. Exceeding it turns a pass into a fail.
    pub hard_latency_budget_ms: Option<u64>,
    #[serde(default)]
    pub required_keys: Vec<String>,
    #[serde(default)]
    pub json_schema: BTreeMap<String, JsonType>,
    pub json_deep_schema: Option<DeepSchema>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Latency objective used only for breach-rate accounting and alerts.
    pub sla_ms: Option<u64>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub enabled: Enabled,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Requests for this spec must be signed with the probe credentials.
    #[serde(default)]
    pub auth: bool,
    /// JSON body sent with non-GET requests.
    pub body: Option<Value>,
}

fn default_retry_delay_ms() -> u64 {
    250
}

impl ContractTestSpec {
    /// Creates a GET spec expecting 200 with no validation, retries or breaker.
    pub fn new(id: impl Into<String>, label: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            expected_status: ExpectedStatus::default(),
            max_latency_ms: None,
            hard_latency_budget_ms: None,
            required_keys: Vec::new(),
            json_schema: BTreeMap::new(),
            json_deep_schema: None,
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            sla_ms: None,
            circuit_breaker: None,
            enabled: Enabled::default(),
            headers: BTreeMap::new(),
            auth: false,
            body: None,
        }
    }

    /// Client-side request timeout: twice the soft budget.
    pub fn timeout_ms(&self) -> u64 {
        self.max_latency_ms.unwrap_or(DEFAULT_MAX_LATENCY_MS).saturating_mul(2)
    }

    /// Whether the response body has to be parsed as JSON.
    pub fn validates_body(&self) -> bool {
        !self.required_keys.is_empty()
            || !self.json_schema.is_empty()
            || self.json_deep_schema.is_some()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "id".to_string(),
                format!("spec '{}' has an empty id", self.label),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                format!("{}.endpoint", self.id),
                "endpoint must not be empty".to_string(),
            ));
        }
        if let ExpectedStatus::AnyOf(codes) = &self.expected_status {
            if codes.is_empty() {
                return Err(CoreError::InvalidInput(
                    format!("{}.expected_status", self.id),
                    "at least one status code is required".to_string(),
                ));
            }
        }
        if let Some(cb) = &self.circuit_breaker {
            if cb.failure_threshold == 0 {
                return Err(CoreError::InvalidInput(
                    format!("{}.circuit_breaker.failure_threshold", self.id),
                    "must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Runtime latency-budget tuning for a single spec, persisted per service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_latency_budget_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_ms: Option<u64>,
}

impl SpecOverride {
    /// Returns a copy of `spec` with every field this override sets replaced.
    pub fn apply(&self, spec: &ContractTestSpec) -> ContractTestSpec {
        let mut merged = spec.clone();
        if let Some(ms) = self.max_latency_ms {
            merged.max_latency_ms = Some(ms);
        }
        if let Some(ms) = self.hard_latency_budget_ms {
            merged.hard_latency_budget_ms = Some(ms);
        }
        if let Some(ms) = self.sla_ms {
            merged.sla_ms = Some(ms);
        }
        merged
    }
}
