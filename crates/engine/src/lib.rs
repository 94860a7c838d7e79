//! # Sentinel Engine
//!
//! Runs declarative contract tests against live services and keeps the
//! rolling evidence needed to judge their health.
//!
//! ## Components
//!
//! - `ProbeExecutor`: one spec, one result. Retries with backoff, enforces
//!   the request timeout, validates status and body, applies latency budgets.
//! - `BreakerBook`: per-spec circuit breakers fed by the executor.
//! - `ContractTestEngine`: the per-service batch runner. Owns the result log,
//!   latency history, breaker state and the one-alert-per-batch policy.
//! - `Supervisor`: one engine per configured service plus the poll loop.
//! - `DiagnosticsProbe`: ad-hoc latency sampling of named endpoints.

pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod runner;
pub mod supervisor;
pub mod validation;

#[cfg(test)]
mod testing;

pub use breaker::{BreakerBook, CircuitBreakerState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use diagnostics::{DiagnosticSample, DiagnosticsProbe, EndpointReport};
pub use error::{DiagnosticsError, EngineError};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics, SchemaKind, TracingMetricsSink};
pub use probe::{ProbeExecutor, resolve_url};
pub use runner::{ContractTestEngine, EngineDeps, EngineLimits, RunOptions, select_alert};
pub use supervisor::Supervisor;
