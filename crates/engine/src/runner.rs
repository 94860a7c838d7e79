use crate::breaker::BreakerBook;
use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::probe::ProbeExecutor;
use alerter::AlertSink;
use analytics::{LatencyHistory, Summary, SummaryEngine, SummaryInput};
use api_client::ProbeTransport;
use chrono::{DateTime, Utc};
use configuration::ServiceConfig;
use core_types::{ContractTestResult, ContractTestSpec, SpecOverride, TestStatus};
use events::{AlertEvent, AlertReason, BatchCompleted, LogLevel, LogMessage, ProbeMessage, SpecRef};
use futures::future::join_all;
use snapshot_store::{ServiceSnapshot, SnapshotStore};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Latency above this multiple of `sla_ms` raises a severe-latency alert.
const SEVERE_SLA_FACTOR: f64 = 1.5;

/// Bounds on the rolling result log and the per-spec latency history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub result_cap: usize,
    pub history_cap: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            result_cap: 600,
            history_cap: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Probe every spec concurrently instead of one after another.
    pub parallel: bool,
}

/// The collaborators a `ContractTestEngine` is wired with.
pub struct EngineDeps {
    pub transport: Arc<dyn ProbeTransport>,
    pub store: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn MetricsSink>,
    pub alerts: Option<Arc<dyn AlertSink>>,
    pub events: Option<broadcast::Sender<ProbeMessage>>,
    pub limits: EngineLimits,
}

impl EngineDeps {
    /// System clock, no metrics, no alerts and no event channel.
    pub fn new(transport: Arc<dyn ProbeTransport>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            transport,
            store,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
            alerts: None,
            events: None,
            limits: EngineLimits::default(),
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    results: VecDeque<ContractTestResult>,
    history: BTreeMap<String, VecDeque<u64>>,
}

impl EngineState {
    fn from_snapshot(snapshot: ServiceSnapshot) -> Self {
        Self {
            results: snapshot.results.into(),
            history: snapshot
                .history
                .into_iter()
                .map(|(id, samples)| (id, samples.into()))
                .collect(),
        }
    }

    fn push(&mut self, result: &ContractTestResult, limits: EngineLimits) {
        if let Some(latency_ms) = result.latency_ms {
            let samples = self.history.entry(result.id.clone()).or_default();
            samples.push_back(latency_ms);
            while samples.len() > limits.history_cap {
                samples.pop_front();
            }
        }
        self.results.push_back(result.clone());
        while self.results.len() > limits.result_cap {
            self.results.pop_front();
        }
    }

    fn history(&self) -> LatencyHistory {
        self.history
            .iter()
            .map(|(id, samples)| (id.clone(), samples.iter().copied().collect()))
            .collect()
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            results: self.results.iter().cloned().collect(),
            history: self.history(),
        }
    }
}

/// Clears the running flag and the batch token however the batch ends.
struct RunGuard<'a> {
    engine: &'a ContractTestEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut current = self
            .engine
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = None;
        self.engine.running.store(false, Ordering::Release);
    }
}

/// Runs a service's contract-test specs and keeps their rolling history.
///
/// One engine exists per service. Results and latency history survive
/// restarts through the `SnapshotStore`; circuit breakers do not.
pub struct ContractTestEngine {
    service_id: String,
    base_url: String,
    specs: RwLock<Arc<Vec<ContractTestSpec>>>,
    executor: ProbeExecutor,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    alerts: Option<Arc<dyn AlertSink>>,
    events: Option<broadcast::Sender<ProbeMessage>>,
    limits: EngineLimits,
    state: Mutex<EngineState>,
    breakers: Mutex<BreakerBook>,
    running: AtomicBool,
    current_run: std::sync::Mutex<Option<CancellationToken>>,
}

impl ContractTestEngine {
    /// Creates the engine and rehydrates its persisted results and history.
    ///
    /// A missing or unreadable snapshot starts the engine empty.
    pub async fn new(
        service_id: impl Into<String>,
        base_url: impl Into<String>,
        specs: Vec<ContractTestSpec>,
        deps: EngineDeps,
    ) -> Self {
        let service_id = service_id.into();

        let state = match deps.store.load_snapshot(&service_id).await {
            Ok(Some(mut snapshot)) => {
                snapshot.trim(deps.limits.result_cap, deps.limits.history_cap);
                info!(
                    service = %service_id,
                    results = snapshot.results.len(),
                    "Restored contract-test snapshot."
                );
                EngineState::from_snapshot(snapshot)
            }
            Ok(None) => EngineState::default(),
            Err(e) => {
                warn!(service = %service_id, error = %e, "Failed to load snapshot; starting empty.");
                EngineState::default()
            }
        };

        Self {
            executor: ProbeExecutor::new(
                service_id.clone(),
                deps.transport,
                deps.clock.clone(),
                deps.metrics.clone(),
            ),
            service_id,
            base_url: base_url.into(),
            specs: RwLock::new(Arc::new(specs)),
            store: deps.store,
            clock: deps.clock,
            metrics: deps.metrics,
            alerts: deps.alerts,
            events: deps.events,
            limits: deps.limits,
            state: Mutex::new(state),
            breakers: Mutex::new(BreakerBook::new()),
            running: AtomicBool::new(false),
            current_run: std::sync::Mutex::new(None),
        }
    }

    pub async fn from_config(service: &ServiceConfig, deps: EngineDeps) -> Self {
        Self::new(
            service.id.clone(),
            service.base_url.clone(),
            service.specs.clone(),
            deps,
        )
        .await
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The declared specs, without runtime overrides.
    pub async fn specs(&self) -> Arc<Vec<ContractTestSpec>> {
        self.specs.read().await.clone()
    }

    /// Replaces the spec list. History for surviving spec ids is kept.
    pub async fn set_specs(&self, specs: Vec<ContractTestSpec>) {
        self.breakers.lock().await.retain(&specs);
        *self.specs.write().await = Arc::new(specs);
    }

    /// The rolling result log, oldest first.
    pub async fn results(&self) -> Vec<ContractTestResult> {
        self.state.lock().await.results.iter().cloned().collect()
    }

    pub async fn history(&self) -> LatencyHistory {
        self.state.lock().await.history()
    }

    pub async fn summary(&self) -> Summary {
        let specs = self.effective_specs().await;
        let (results, history) = {
            let state = self.state.lock().await;
            (
                state.results.iter().cloned().collect::<Vec<_>>(),
                state.history(),
            )
        };
        let circuits = self
            .breakers
            .lock()
            .await
            .views(&specs, self.clock.now_ms());

        SummaryEngine::new().summarize(SummaryInput {
            service_id: &self.service_id,
            specs: &specs,
            results: &results,
            history: &history,
            circuits,
        })
    }

    /// Persists a latency-budget override for one spec. It applies from the
    /// next run on.
    pub async fn set_override(
        &self,
        spec_id: &str,
        spec_override: SpecOverride,
    ) -> Result<(), EngineError> {
        if !self.specs().await.iter().any(|s| s.id == spec_id) {
            return Err(EngineError::UnknownSpec(spec_id.to_string()));
        }
        let mut overrides = self.store.load_overrides(&self.service_id).await?;
        if spec_override == SpecOverride::default() {
            overrides.remove(spec_id);
        } else {
            overrides.insert(spec_id.to_string(), spec_override);
        }
        self.store.save_overrides(&self.service_id, &overrides).await?;
        info!(service = %self.service_id, spec = spec_id, "Spec override saved.");
        Ok(())
    }

    /// Cancels the batch in flight, if any. Returns whether one was running.
    pub fn abort(&self) -> bool {
        let current = self
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(token) => {
                info!(service = %self.service_id, "Aborting contract-test batch.");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs every spec once and records the batch.
    ///
    /// Returns `None` without touching the network when a batch is already
    /// running on this engine.
    pub async fn run_all(&self, options: RunOptions) -> Option<Vec<ContractTestResult>> {
        // The flag flips under the token lock so `abort` never sees a running
        // batch without its token.
        let batch = {
            let mut current = self
                .current_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(service = %self.service_id, "Batch already running; ignoring request.");
                return None;
            }
            let batch = CancellationToken::new();
            *current = Some(batch.clone());
            batch
        };
        let _guard = RunGuard { engine: self };

        let started_at = self.now();
        let specs = self.effective_specs().await;
        info!(
            service = %self.service_id,
            specs = specs.len(),
            parallel = options.parallel,
            "Running contract tests."
        );

        let results = if options.parallel {
            join_all(specs.iter().map(|spec| {
                let token = batch.child_token();
                async move {
                    self.executor
                        .execute(spec, &self.base_url, &self.breakers, &token)
                        .await
                }
            }))
            .await
        } else {
            let mut results = Vec::with_capacity(specs.len());
            for spec in specs.iter() {
                let token = batch.child_token();
                results.push(
                    self.executor
                        .execute(spec, &self.base_url, &self.breakers, &token)
                        .await,
                );
            }
            results
        };

        self.record_batch(&specs, &results).await;
        self.publish(ProbeMessage::BatchCompleted(BatchCompleted {
            run_id: Uuid::new_v4(),
            service_id: self.service_id.clone(),
            started_at,
            finished_at: self.now(),
            parallel: options.parallel,
            results: results.clone(),
        }));
        Some(results)
    }

    /// Schedules a single run after `delay` on the current runtime.
    pub fn spawn_initial_run(self: &Arc<Self>, delay: Duration, options: RunOptions) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.run_all(options).await;
        })
    }

    async fn record_batch(&self, specs: &[ContractTestSpec], results: &[ContractTestResult]) {
        let snapshot = {
            let mut state = self.state.lock().await;
            for result in results {
                state.push(result, self.limits);
            }
            state.snapshot()
        };

        if let Err(e) = self.store.save_snapshot(&self.service_id, &snapshot).await {
            error!(service = %self.service_id, error = %e, "Failed to persist snapshot.");
            self.publish(ProbeMessage::Log(LogMessage {
                timestamp: self.now(),
                level: LogLevel::Error,
                message: format!("snapshot write failed for {}: {}", self.service_id, e),
            }));
        }

        let open = self
            .breakers
            .lock()
            .await
            .open_count(specs, self.clock.now_ms());
        self.metrics.set_open_circuits(&self.service_id, open);

        let passed = results.iter().filter(|r| r.status == TestStatus::Pass).count();
        info!(
            service = %self.service_id,
            passed,
            total = results.len(),
            open_circuits = open,
            "Contract-test batch recorded."
        );

        if let Some(alert) = select_alert(&self.service_id, specs, results) {
            if let Some(sink) = &self.alerts {
                if let Err(e) = sink.dispatch(&alert).await {
                    error!(service = %self.service_id, error = %e, "Alert dispatch failed.");
                }
            }
        }
    }

    /// Declared specs with the persisted overrides merged in by id.
    async fn effective_specs(&self) -> Arc<Vec<ContractTestSpec>> {
        let specs = self.specs().await;
        match self.store.load_overrides(&self.service_id).await {
            Ok(overrides) if overrides.is_empty() => specs,
            Ok(overrides) => Arc::new(
                specs
                    .iter()
                    .map(|spec| match overrides.get(&spec.id) {
                        Some(o) => o.apply(spec),
                        None => spec.clone(),
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(service = %self.service_id, error = %e, "Failed to load overrides; using declared specs.");
                specs
            }
        }
    }

    fn publish(&self, message: ProbeMessage) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(message);
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now)
    }
}

/// Picks the single alert for a batch, if any.
///
/// The first `fail` in declaration order wins. Otherwise the first result
/// whose latency exceeds 1.5x its spec's SLA raises a severe-latency alert.
/// `results` must be aligned with `specs`.
pub fn select_alert(
    service_id: &str,
    specs: &[ContractTestSpec],
    results: &[ContractTestResult],
) -> Option<AlertEvent> {
    let alert = |spec: &ContractTestSpec, result: &ContractTestResult, reason| AlertEvent {
        service_id: service_id.to_string(),
        spec: SpecRef::from(spec),
        result: result.clone(),
        reason,
    };

    if let Some((spec, result)) = specs
        .iter()
        .zip(results)
        .find(|(_, r)| r.status == TestStatus::Fail)
    {
        return Some(alert(spec, result, AlertReason::StatusFail));
    }

    specs
        .iter()
        .zip(results)
        .find(|(spec, result)| match (spec.sla_ms, result.latency_ms) {
            (Some(sla), Some(latency)) => latency as f64 > sla as f64 * SEVERE_SLA_FACTOR,
            _ => false,
        })
        .map(|(spec, result)| alert(spec, result, AlertReason::SlaSevereLatency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{GatedTransport, ScriptedTransport, Step, json};
    use alerter::error::AlerterError;
    use async_trait::async_trait;
    use core_types::CircuitBreakerConfig;
    use serde_json::json;
    use snapshot_store::{FileSnapshotStore, MemorySnapshotStore};

    #[derive(Default)]
    struct RecordingSink {
        alerts: std::sync::Mutex<Vec<AlertEvent>>,
    }

    impl RecordingSink {
        fn alerts(&self) -> Vec<AlertEvent> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError> {
            self.alerts.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn spec(id: &str) -> ContractTestSpec {
        ContractTestSpec::new(id, id.to_uppercase(), format!("/{}", id))
    }

    fn deps(transport: Arc<dyn ProbeTransport>, store: Arc<dyn SnapshotStore>) -> EngineDeps {
        let mut deps = EngineDeps::new(transport, store);
        deps.clock = Arc::new(ManualClock::new(1_700_000_000_000));
        deps
    }

    #[tokio::test]
    async fn run_all_while_running_is_a_no_op() {
        let transport = Arc::new(GatedTransport::default());
        let engine = Arc::new(
            ContractTestEngine::new(
                "svc",
                "http://svc",
                vec![spec("health")],
                deps(transport.clone(), Arc::new(MemorySnapshotStore::new())),
            )
            .await,
        );

        let background = engine.clone();
        let first = tokio::spawn(async move { background.run_all(RunOptions::default()).await });
        transport.entered.notified().await;

        assert!(engine.is_running());
        assert!(engine.run_all(RunOptions::default()).await.is_none());
        assert_eq!(transport.calls(), 1);

        transport.release.notify_one();
        let results = first.await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert!(!engine.is_running());
        assert_eq!(engine.results().await.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_round_trips_across_engine_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path()));
        let transport = Arc::new(ScriptedTransport::always(json(200, json!({}))));
        let specs = vec![spec("a"), spec("b")];

        let first = ContractTestEngine::new(
            "svc",
            "http://svc",
            specs.clone(),
            deps(transport.clone(), store.clone()),
        )
        .await;
        first.run_all(RunOptions::default()).await.unwrap();
        first.run_all(RunOptions { parallel: true }).await.unwrap();

        let second =
            ContractTestEngine::new("svc", "http://svc", specs, deps(transport, store)).await;
        assert_eq!(second.results().await, first.results().await);
        assert_eq!(second.history().await, first.history().await);
        assert_eq!(second.history().await["a"].len(), 2);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contract-tests-svc.json"), b"garbage").unwrap();
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![spec("a")],
            deps(
                Arc::new(ScriptedTransport::always(json(200, json!({})))),
                Arc::new(FileSnapshotStore::new(dir.path())),
            ),
        )
        .await;
        assert!(engine.results().await.is_empty());
        assert!(engine.run_all(RunOptions::default()).await.is_some());
    }

    #[tokio::test]
    async fn caps_results_and_history() {
        let mut d = deps(
            Arc::new(ScriptedTransport::always(json(200, json!({})))),
            Arc::new(MemorySnapshotStore::new()),
        );
        d.limits = EngineLimits {
            result_cap: 5,
            history_cap: 3,
        };
        let engine =
            ContractTestEngine::new("svc", "http://svc", vec![spec("a"), spec("b")], d).await;

        for _ in 0..4 {
            engine.run_all(RunOptions::default()).await.unwrap();
        }
        assert_eq!(engine.results().await.len(), 5);
        let history = engine.history().await;
        assert_eq!(history["a"].len(), 3);
        assert_eq!(history["b"].len(), 3);
    }

    #[tokio::test]
    async fn errors_without_a_response_record_no_latency() {
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![spec("a")],
            deps(
                Arc::new(ScriptedTransport::always(Step::Fail("refused".into()))),
                Arc::new(MemorySnapshotStore::new()),
            ),
        )
        .await;
        engine.run_all(RunOptions::default()).await.unwrap();
        assert_eq!(engine.results().await.len(), 1);
        assert!(engine.history().await.is_empty());
    }

    #[tokio::test]
    async fn parallel_results_keep_declaration_order() {
        let transport = Arc::new(
            ScriptedTransport::always(json(200, json!({}))).with_delay(Duration::from_millis(5)),
        );
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![spec("c"), spec("a"), spec("b")],
            deps(transport.clone(), Arc::new(MemorySnapshotStore::new())),
        )
        .await;

        let results = engine.run_all(RunOptions { parallel: true }).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn one_alert_per_batch_with_failures_first() {
        let sink = Arc::new(RecordingSink::default());
        let transport = Arc::new(ScriptedTransport::new(vec![
            json(200, json!({})),
            json(500, json!({})),
            json(503, json!({})),
        ]));
        let mut d = deps(transport, Arc::new(MemorySnapshotStore::new()));
        d.alerts = Some(sink.clone());

        let mut slow = spec("slow");
        slow.sla_ms = Some(0);
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![slow, spec("first"), spec("second")],
            d,
        )
        .await;
        engine.run_all(RunOptions::default()).await.unwrap();

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].reason, AlertReason::StatusFail);
        assert_eq!(alerts[0].spec.id, "first");
        assert_eq!(alerts[0].result.http_status, Some(500));
    }

    #[test]
    fn severe_latency_alert_needs_one_and_a_half_times_the_sla() {
        let mut a = spec("a");
        a.sla_ms = Some(100);
        let mut b = spec("b");
        b.sla_ms = Some(100);
        let plain = spec("plain");
        let specs = vec![plain, a, b];

        let result = |spec: &ContractTestSpec, latency| {
            let mut r = ContractTestResult::new(spec, TestStatus::Pass, 0);
            r.latency_ms = Some(latency);
            r
        };

        let results = vec![
            result(&specs[0], 10_000),
            result(&specs[1], 150),
            result(&specs[2], 151),
        ];
        let alert = select_alert("svc", &specs, &results).unwrap();
        assert_eq!(alert.reason, AlertReason::SlaSevereLatency);
        assert_eq!(alert.spec.id, "b");

        let calm = vec![result(&specs[0], 1), result(&specs[1], 150), result(&specs[2], 120)];
        assert!(select_alert("svc", &specs, &calm).is_none());
    }

    #[tokio::test]
    async fn overrides_are_merged_before_each_run() {
        let store = Arc::new(MemorySnapshotStore::new());
        let transport = Arc::new(
            ScriptedTransport::always(json(200, json!({}))).with_delay(Duration::from_millis(20)),
        );
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![spec("a")],
            deps(transport, store.clone()),
        )
        .await;

        engine
            .set_override(
                "a",
                SpecOverride {
                    hard_latency_budget_ms: Some(1),
                    sla_ms: Some(5),
                    ..SpecOverride::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.load_overrides("svc").await.unwrap().len(), 1);

        let results = engine.run_all(RunOptions::default()).await.unwrap();
        assert_eq!(results[0].status, TestStatus::Fail);
        assert!(
            results[0]
                .message
                .as_deref()
                .unwrap()
                .starts_with("latency budget exceeded")
        );
        assert_eq!(engine.summary().await.sla.per_spec[0].sla_ms, 5);
        assert_eq!(engine.specs().await[0].hard_latency_budget_ms, None);

        assert!(matches!(
            engine.set_override("nope", SpecOverride::default()).await,
            Err(EngineError::UnknownSpec(_))
        ));
    }

    #[tokio::test]
    async fn abort_cancels_the_batch_in_flight() {
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let engine = Arc::new(
            ContractTestEngine::new(
                "svc",
                "http://svc",
                vec![spec("a"), spec("b")],
                deps(transport.clone(), Arc::new(MemorySnapshotStore::new())),
            )
            .await,
        );
        assert!(!engine.abort());

        let background = engine.clone();
        let run = tokio::spawn(async move { background.run_all(RunOptions::default()).await });
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(engine.abort());
        let results = run.await.unwrap().unwrap();
        assert!(results.iter().all(|r| r.status == TestStatus::Error));
        assert!(results.iter().all(|r| r.message.as_deref() == Some("aborted")));
        assert_eq!(transport.calls(), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abort_succeeds_as_soon_as_the_batch_is_running() {
        for _ in 0..50 {
            let transport = Arc::new(ScriptedTransport::always(Step::Hang));
            let engine = Arc::new(
                ContractTestEngine::new(
                    "svc",
                    "http://svc",
                    vec![spec("a")],
                    deps(transport, Arc::new(MemorySnapshotStore::new())),
                )
                .await,
            );

            let background = engine.clone();
            let run = tokio::spawn(async move { background.run_all(RunOptions::default()).await });
            while !engine.is_running() {
                std::hint::spin_loop();
            }

            assert!(engine.abort());
            let results = run.await.unwrap().unwrap();
            assert_eq!(results[0].message.as_deref(), Some("aborted"));
        }
    }

    #[tokio::test]
    async fn summary_reports_open_circuits() {
        let mut guarded = spec("a");
        guarded.circuit_breaker = Some(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 60_000,
        });
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![guarded],
            deps(
                Arc::new(ScriptedTransport::always(json(503, json!({})))),
                Arc::new(MemorySnapshotStore::new()),
            ),
        )
        .await;

        engine.run_all(RunOptions::default()).await.unwrap();
        let results = engine.run_all(RunOptions::default()).await.unwrap();
        assert_eq!(results[0].status, TestStatus::Skip);

        let summary = engine.summary().await;
        assert_eq!(summary.open_circuits, 1);
        assert_eq!(summary.max_failure_streak, 1);
        assert_eq!(summary.circuits[0].remaining_cooldown_ms, 60_000);
        assert_eq!(summary.counts.skip, 1);
    }

    #[tokio::test]
    async fn batches_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut d = deps(
            Arc::new(ScriptedTransport::always(json(200, json!({})))),
            Arc::new(MemorySnapshotStore::new()),
        );
        d.events = Some(tx);
        let engine = ContractTestEngine::new("svc", "http://svc", vec![spec("a")], d).await;

        engine.run_all(RunOptions { parallel: true }).await.unwrap();
        match rx.recv().await.unwrap() {
            ProbeMessage::BatchCompleted(batch) => {
                assert_eq!(batch.service_id, "svc");
                assert!(batch.parallel);
                assert_eq!(batch.results.len(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn set_specs_keeps_history_of_surviving_ids() {
        let engine = ContractTestEngine::new(
            "svc",
            "http://svc",
            vec![spec("a")],
            deps(
                Arc::new(ScriptedTransport::always(json(200, json!({})))),
                Arc::new(MemorySnapshotStore::new()),
            ),
        )
        .await;
        engine.run_all(RunOptions::default()).await.unwrap();

        engine.set_specs(vec![spec("a"), spec("b")]).await;
        engine.run_all(RunOptions::default()).await.unwrap();
        let history = engine.history().await;
        assert_eq!(history["a"].len(), 2);
        assert_eq!(history["b"].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_run_fires_after_the_delay() {
        let transport = Arc::new(ScriptedTransport::always(json(200, json!({}))));
        let engine = Arc::new(
            ContractTestEngine::new(
                "svc",
                "http://svc",
                vec![spec("a")],
                deps(transport.clone(), Arc::new(MemorySnapshotStore::new())),
            )
            .await,
        );

        let handle = engine.spawn_initial_run(Duration::from_millis(250), RunOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(), 0);
        handle.await.unwrap();
        assert_eq!(transport.calls(), 1);
    }
}
