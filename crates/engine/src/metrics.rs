use core_types::TestStatus;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Which body check produced a schema failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Shallow,
    Deep,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Shallow => "shallow",
            SchemaKind::Deep => "deep",
        }
    }
}

/// Observability hooks called by the executor and the batch runner.
///
/// Implementations must be cheap; they are called inline on the probe path.
pub trait MetricsSink: Send + Sync {
    fn observe_latency(&self, service: &str, spec: &str, status: TestStatus, latency_ms: u64);
    fn increment_failure(&self, service: &str, spec: &str, status: TestStatus);
    fn increment_sla_breach(&self, service: &str, spec: &str);
    fn increment_schema_failure(&self, service: &str, spec: &str, kind: SchemaKind);
    fn set_open_circuits(&self, service: &str, count: usize);
    fn set_failure_streak(&self, service: &str, spec: &str, streak: u32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_latency(&self, _: &str, _: &str, _: TestStatus, _: u64) {}
    fn increment_failure(&self, _: &str, _: &str, _: TestStatus) {}
    fn increment_sla_breach(&self, _: &str, _: &str) {}
    fn increment_schema_failure(&self, _: &str, _: &str, _: SchemaKind) {}
    fn set_open_circuits(&self, _: &str, _: usize) {}
    fn set_failure_streak(&self, _: &str, _: &str, _: u32) {}
}

/// Emits every observation as a structured `tracing` event under the
/// `sentinel::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn observe_latency(&self, service: &str, spec: &str, status: TestStatus, latency_ms: u64) {
        tracing::debug!(target: "sentinel::metrics", metric = "probe_latency_ms", service, spec, status = %status, value = latency_ms);
    }

    fn increment_failure(&self, service: &str, spec: &str, status: TestStatus) {
        tracing::debug!(target: "sentinel::metrics", metric = "probe_failures_total", service, spec, status = %status);
    }

    fn increment_sla_breach(&self, service: &str, spec: &str) {
        tracing::debug!(target: "sentinel::metrics", metric = "sla_breaches_total", service, spec);
    }

    fn increment_schema_failure(&self, service: &str, spec: &str, kind: SchemaKind) {
        tracing::debug!(target: "sentinel::metrics", metric = "schema_failures_total", service, spec, kind = kind.as_str());
    }

    fn set_open_circuits(&self, service: &str, count: usize) {
        tracing::debug!(target: "sentinel::metrics", metric = "open_circuits", service, value = count);
    }

    fn set_failure_streak(&self, service: &str, spec: &str, streak: u32) {
        tracing::debug!(target: "sentinel::metrics", metric = "failure_streak", service, spec, value = streak);
    }
}

type SpecKey = (String, String);

/// Everything an `InMemoryMetrics` has observed so far.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub latencies: HashMap<(String, String, TestStatus), Vec<u64>>,
    pub failures: HashMap<SpecKey, u64>,
    pub sla_breaches: HashMap<SpecKey, u64>,
    pub schema_failures: HashMap<(String, String, SchemaKind), u64>,
    pub open_circuits: HashMap<String, usize>,
    pub failure_streaks: HashMap<SpecKey, u32>,
}

/// Records observations in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with<F: FnOnce(&mut MetricsSnapshot)>(&self, f: F) {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

fn key(service: &str, spec: &str) -> SpecKey {
    (service.to_string(), spec.to_string())
}

impl MetricsSink for InMemoryMetrics {
    fn observe_latency(&self, service: &str, spec: &str, status: TestStatus, latency_ms: u64) {
        self.with(|m| {
            m.latencies
                .entry((service.to_string(), spec.to_string(), status))
                .or_default()
                .push(latency_ms)
        });
    }

    fn increment_failure(&self, service: &str, spec: &str, _status: TestStatus) {
        self.with(|m| *m.failures.entry(key(service, spec)).or_default() += 1);
    }

    fn increment_sla_breach(&self, service: &str, spec: &str) {
        self.with(|m| *m.sla_breaches.entry(key(service, spec)).or_default() += 1);
    }

    fn increment_schema_failure(&self, service: &str, spec: &str, kind: SchemaKind) {
        self.with(|m| {
            *m.schema_failures
                .entry((service.to_string(), spec.to_string(), kind))
                .or_default() += 1
        });
    }

    fn set_open_circuits(&self, service: &str, count: usize) {
        self.with(|m| {
            m.open_circuits.insert(service.to_string(), count);
        });
    }

    fn set_failure_streak(&self, service: &str, spec: &str, streak: u32) {
        self.with(|m| {
            m.failure_streaks.insert(key(service, spec), streak);
        });
    }
}
