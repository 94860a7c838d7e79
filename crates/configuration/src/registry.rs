use crate::settings::ServiceConfig;
use core_types::{CircuitBreakerConfig, ContractTestSpec, JsonType};

/// (id, display name, base URL, health path) of every platform service probed by default.
const PLATFORM_SERVICES: &[(&str, &str, &str, &str)] = &[
    ("fks_api", "API Gateway", "http://fks_api:8001", "/api/health"),
    ("fks_data", "Data Ingestion", "http://fks_data:8002", "/health"),
    ("fks_execution", "Trade Execution", "http://fks_execution:8003", "/health"),
    ("fks_ninja", "NinjaTrader Bridge", "http://fks_ninja:8004", "/health"),
    ("fks_web", "Web UI", "http://fks_web:3000", "/health"),
];

/// The registry used when the configuration file declares no services.
///
/// Each service gets a single health spec with a modest latency budget,
/// one retry and a circuit breaker that opens after three failures.
pub fn default_services() -> Vec<ServiceConfig> {
    PLATFORM_SERVICES
        .iter()
        .map(|(id, name, base_url, path)| ServiceConfig {
            id: id.to_string(),
            name: Some(name.to_string()),
            base_url: base_url.to_string(),
            specs: vec![health_spec(path)],
        })
        .collect()
}

fn health_spec(path: &str) -> ContractTestSpec {
    let mut spec = ContractTestSpec::new("health", "Health endpoint", path);
    spec.max_latency_ms = Some(1_000);
    spec.sla_ms = Some(500);
    spec.retries = 1;
    spec.json_schema.insert("status".to_string(), JsonType::String);
    spec.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 3,
        cooldown_ms: 30_000,
    });
    spec
}
