use core_types::{ContractTestResult, TestStatus};
use serde::{Deserialize, Serialize};

/// A derived, point-in-time view of one service's contract-test state.
///
/// This struct is the final output of the `SummaryEngine` and is what the CLI
/// and HTTP surfaces render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub service_id: String,
    /// The most recent result of every spec, in spec declaration order.
    pub latest: Vec<ContractTestResult>,
    pub counts: StatusCounts,
    pub percentiles: LatencyPercentiles,
    pub sla: SlaBreakdown,
    pub circuits: Vec<CircuitView>,
    pub max_failure_streak: u32,
    pub open_circuits: usize,
    pub spec_health: Vec<SpecHealth>,
    pub health: ServiceHealth,
}

/// Status counts over the latest result of each spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub skip: usize,
    pub total: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Pass => self.pass += 1,
            TestStatus::Fail => self.fail += 1,
            TestStatus::Error => self.error += 1,
            TestStatus::Skip => self.skip += 1,
        }
        self.total += 1;
    }
}

/// Nearest-rank percentiles over every latency sample of the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: Option<u64>,
    pub p95: Option<u64>,
    pub p99: Option<u64>,
    pub samples: usize,
}

/// SLA breach accounting for one spec that declares `sla_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSla {
    pub id: String,
    pub sla_ms: u64,
    pub breaches: usize,
    pub samples: usize,
    pub rate: Option<f64>,
}

/// Aggregate SLA breach accounting. Specs without `sla_ms` are excluded from
/// both the numerator and the denominator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaBreakdown {
    pub breaches: usize,
    pub samples: usize,
    pub rate: Option<f64>,
    pub per_spec: Vec<SpecSla>,
}

/// The circuit breaker state of one spec as seen at summary time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitView {
    pub id: String,
    pub streak: u32,
    pub open: bool,
    /// Zero when the circuit is closed.
    pub remaining_cooldown_ms: u64,
}

/// Success rate and mean latency of one spec over the rolling result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecHealth {
    pub id: String,
    pub label: String,
    /// Pass, fail and error results; skips are not checks.
    pub total_checks: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate_pct: Option<f64>,
    /// Mean latency of passing results.
    pub avg_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Every non-skipped latest result passed.
    Healthy,
    /// A mix of passing and failing latest results.
    Degraded,
    /// Every non-skipped latest result failed or errored.
    Down,
    /// No result has been recorded, or every spec was skipped.
    Unknown,
}
