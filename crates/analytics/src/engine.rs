use crate::report::{
    CircuitView, LatencyPercentiles, ServiceHealth, SlaBreakdown, SpecHealth, SpecSla,
    StatusCounts, Summary,
};
use core_types::{ContractTestResult, ContractTestSpec, TestStatus};
use std::collections::{BTreeMap, HashMap};

/// Rolling latency samples (milliseconds, oldest first) keyed by spec id.
pub type LatencyHistory = BTreeMap<String, Vec<u64>>;

/// Everything the summary is derived from.
pub struct SummaryInput<'a> {
    pub service_id: &'a str,
    pub specs: &'a [ContractTestSpec],
    /// The rolling result log, oldest first.
    pub results: &'a [ContractTestResult],
    pub history: &'a LatencyHistory,
    pub circuits: Vec<CircuitView>,
}

/// Nearest-rank percentile of an ascending slice: the value at
/// `floor(n * p)`, clamped to the last index. No interpolation.
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

fn rate(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// Counts samples above each spec's `sla_ms`. Specs without an SLA are ignored.
pub fn sla_breakdown(specs: &[ContractTestSpec], history: &LatencyHistory) -> SlaBreakdown {
    let mut breakdown = SlaBreakdown::default();

    for spec in specs {
        let Some(sla_ms) = spec.sla_ms else { continue };
        let samples = history.get(&spec.id).map(Vec::as_slice).unwrap_or_default();
        let breaches = samples.iter().filter(|&&ms| ms > sla_ms).count();

        breakdown.breaches += breaches;
        breakdown.samples += samples.len();
        breakdown.per_spec.push(SpecSla {
            id: spec.id.clone(),
            sla_ms,
            breaches,
            samples: samples.len(),
            rate: rate(breaches, samples.len()),
        });
    }

    breakdown.rate = rate(breakdown.breaches, breakdown.samples);
    breakdown
}

/// A stateless calculator for deriving a `Summary` from engine state.
#[derive(Debug, Default)]
pub struct SummaryEngine {}

impl SummaryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summarize(&self, input: SummaryInput<'_>) -> Summary {
        let latest = self.latest_per_spec(input.specs, input.results);

        let mut counts = StatusCounts::default();
        for result in &latest {
            counts.record(result.status);
        }

        let max_failure_streak = input.circuits.iter().map(|c| c.streak).max().unwrap_or(0);
        let open_circuits = input.circuits.iter().filter(|c| c.open).count();

        Summary {
            service_id: input.service_id.to_string(),
            health: self.classify(&latest),
            counts,
            percentiles: self.latency_percentiles(input.history),
            sla: sla_breakdown(input.specs, input.history),
            spec_health: self.spec_health(input.specs, input.results),
            latest,
            circuits: input.circuits,
            max_failure_streak,
            open_circuits,
        }
    }

    /// Pools every spec's samples and picks p50/p95/p99 by nearest rank.
    pub fn latency_percentiles(&self, history: &LatencyHistory) -> LatencyPercentiles {
        let mut pooled: Vec<u64> = history.values().flatten().copied().collect();
        pooled.sort_unstable();

        LatencyPercentiles {
            p50: percentile(&pooled, 0.50),
            p95: percentile(&pooled, 0.95),
            p99: percentile(&pooled, 0.99),
            samples: pooled.len(),
        }
    }

    fn latest_per_spec(
        &self,
        specs: &[ContractTestSpec],
        results: &[ContractTestResult],
    ) -> Vec<ContractTestResult> {
        let mut newest: HashMap<&str, &ContractTestResult> = HashMap::new();
        for result in results.iter().rev() {
            newest.entry(result.id.as_str()).or_insert(result);
        }

        specs
            .iter()
            .filter_map(|spec| newest.get(spec.id.as_str()).map(|r| (*r).clone()))
            .collect()
    }

    fn spec_health(
        &self,
        specs: &[ContractTestSpec],
        results: &[ContractTestResult],
    ) -> Vec<SpecHealth> {
        specs
            .iter()
            .map(|spec| {
                let mut successful = 0;
                let mut failed = 0;
                let mut latency_sum = 0u64;
                let mut latency_count = 0usize;

                for result in results.iter().filter(|r| r.id == spec.id) {
                    match result.status {
                        TestStatus::Pass => {
                            successful += 1;
                            if let Some(ms) = result.latency_ms {
                                latency_sum += ms;
                                latency_count += 1;
                            }
                        }
                        TestStatus::Fail | TestStatus::Error => failed += 1,
                        TestStatus::Skip => {}
                    }
                }

                let total_checks = successful + failed;
                SpecHealth {
                    id: spec.id.clone(),
                    label: spec.label.clone(),
                    total_checks,
                    successful,
                    failed,
                    success_rate_pct: rate(successful, total_checks).map(|r| r * 100.0),
                    avg_latency_ms: (latency_count > 0)
                        .then(|| latency_sum as f64 / latency_count as f64),
                }
            })
            .collect()
    }

    fn classify(&self, latest: &[ContractTestResult]) -> ServiceHealth {
        let checked: Vec<TestStatus> = latest
            .iter()
            .map(|r| r.status)
            .filter(|s| *s != TestStatus::Skip)
            .collect();

        if checked.is_empty() {
            ServiceHealth::Unknown
        } else if checked.iter().all(|s| *s == TestStatus::Pass) {
            ServiceHealth::Healthy
        } else if checked.iter().all(TestStatus::is_failure) {
            ServiceHealth::Down
        } else {
            ServiceHealth::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: TestStatus, latency: Option<u64>, ts: i64) -> ContractTestResult {
        let spec = ContractTestSpec::new(id, id, format!("/{}", id));
        let mut result = ContractTestResult::new(&spec, status, ts);
        result.latency_ms = latency;
        result
    }

    fn spec_with_sla(id: &str, sla_ms: Option<u64>) -> ContractTestSpec {
        let mut spec = ContractTestSpec::new(id, id, format!("/{}", id));
        spec.sla_ms = sla_ms;
        spec
    }

    #[test]
    fn nearest_rank_p50_picks_floor_index() {
        let sorted: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        // floor(10 * 0.5) = 5, zero-indexed.
        assert_eq!(percentile(&sorted, 0.50), Some(60));
        assert_eq!(percentile(&sorted, 0.95), Some(100));
        assert_eq!(percentile(&sorted, 0.99), Some(100));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn percentiles_pool_samples_across_specs() {
        let mut history = LatencyHistory::new();
        history.insert("a".to_string(), vec![100, 20, 80, 40, 60]);
        history.insert("b".to_string(), vec![30, 10, 90, 50, 70]);

        let p = SummaryEngine::new().latency_percentiles(&history);
        assert_eq!(p.samples, 10);
        assert_eq!(p.p50, Some(60));
        assert_eq!(p.p99, Some(100));
    }

    #[test]
    fn sla_breach_rate_counts_only_specs_with_an_sla() {
        let specs = vec![spec_with_sla("quotes", Some(100)), spec_with_sla("orders", None)];
        let mut history = LatencyHistory::new();
        history.insert("quotes".to_string(), vec![80, 120, 90, 150]);
        history.insert("orders".to_string(), vec![900, 900]);

        let sla = sla_breakdown(&specs, &history);
        assert_eq!(sla.breaches, 2);
        assert_eq!(sla.samples, 4);
        assert_eq!(sla.rate, Some(0.5));
        assert_eq!(sla.per_spec.len(), 1);
        assert_eq!(sla.per_spec[0].breaches, 2);
    }

    #[test]
    fn summary_uses_latest_result_in_declaration_order() {
        let specs = vec![spec_with_sla("b", None), spec_with_sla("a", None)];
        let results = vec![
            result("a", TestStatus::Fail, Some(10), 1),
            result("b", TestStatus::Pass, Some(20), 2),
            result("a", TestStatus::Pass, Some(30), 3),
            result("removed", TestStatus::Error, None, 4),
        ];
        let circuits = vec![
            CircuitView { id: "a".into(), streak: 0, open: false, remaining_cooldown_ms: 0 },
            CircuitView { id: "b".into(), streak: 4, open: true, remaining_cooldown_ms: 900 },
        ];

        let summary = SummaryEngine::new().summarize(SummaryInput {
            service_id: "svc",
            specs: &specs,
            results: &results,
            history: &LatencyHistory::new(),
            circuits,
        });

        let ids: Vec<&str> = summary.latest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(summary.latest[1].timestamp, 3);
        assert_eq!(summary.counts.pass, 2);
        assert_eq!(summary.counts.total, 2);
        assert_eq!(summary.max_failure_streak, 4);
        assert_eq!(summary.open_circuits, 1);
        assert_eq!(summary.health, ServiceHealth::Healthy);

        let a = summary.spec_health.iter().find(|h| h.id == "a").unwrap();
        assert_eq!(a.total_checks, 2);
        assert_eq!(a.success_rate_pct, Some(50.0));
        assert_eq!(a.avg_latency_ms, Some(30.0));
    }

    #[test]
    fn health_classification() {
        let engine = SummaryEngine::new();
        assert_eq!(engine.classify(&[]), ServiceHealth::Unknown);
        assert_eq!(
            engine.classify(&[result("a", TestStatus::Skip, None, 0)]),
            ServiceHealth::Unknown
        );
        assert_eq!(
            engine.classify(&[
                result("a", TestStatus::Error, None, 0),
                result("b", TestStatus::Fail, None, 0),
                result("c", TestStatus::Skip, None, 0),
            ]),
            ServiceHealth::Down
        );
        assert_eq!(
            engine.classify(&[
                result("a", TestStatus::Pass, None, 0),
                result("b", TestStatus::Fail, None, 0),
            ]),
            ServiceHealth::Degraded
        );
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = SummaryEngine::new().summarize(SummaryInput {
            service_id: "svc",
            specs: &[],
            results: &[],
            history: &LatencyHistory::new(),
            circuits: Vec::new(),
        });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["serviceId"], "svc");
        assert_eq!(json["maxFailureStreak"], 0);
        assert_eq!(json["health"], "unknown");
    }
}
