use crate::clock::{Clock, SystemClock};
use crate::diagnostics::DiagnosticsProbe;
use crate::error::EngineError;
use crate::metrics::{MetricsSink, TracingMetricsSink};
use crate::runner::{ContractTestEngine, EngineDeps, EngineLimits, RunOptions};
use alerter::{AlertFanout, AlertSink, BroadcastAlertSink, LogAlertSink, TelegramAlerter};
use api_client::{ProbeTransport, ReqwestTransport};
use configuration::{Config, EngineSettings};
use core_types::ContractTestResult;
use events::ProbeMessage;
use futures::future::join_all;
use snapshot_store::{FileSnapshotStore, SnapshotStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns one `ContractTestEngine` per configured service and drives them.
pub struct Supervisor {
    engines: BTreeMap<String, Arc<ContractTestEngine>>,
    diagnostics: Arc<DiagnosticsProbe>,
    settings: EngineSettings,
}

impl Supervisor {
    pub fn new(
        engines: Vec<Arc<ContractTestEngine>>,
        diagnostics: Arc<DiagnosticsProbe>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            engines: engines
                .into_iter()
                .map(|engine| (engine.service_id().to_string(), engine))
                .collect(),
            diagnostics,
            settings,
        }
    }

    /// Wires every service in `config` with the live HTTP transport, the
    /// file snapshot store and the configured alert sinks.
    pub async fn from_config(
        config: &Config,
        events: Option<broadcast::Sender<ProbeMessage>>,
    ) -> Result<Self, EngineError> {
        let transport: Arc<dyn ProbeTransport> =
            Arc::new(ReqwestTransport::new(config.credentials.clone())?);
        let store: Arc<dyn SnapshotStore> =
            Arc::new(FileSnapshotStore::new(&config.engine.snapshot_dir));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

        let mut fanout = AlertFanout::new().with(Arc::new(LogAlertSink));
        if let Some(telegram) = TelegramAlerter::new(&config.telegram) {
            fanout = fanout.with(Arc::new(telegram));
        }
        if let Some(tx) = &events {
            fanout = fanout.with(Arc::new(BroadcastAlertSink::new(tx.clone())));
        }
        let alerts: Arc<dyn AlertSink> = Arc::new(fanout);

        let limits = EngineLimits {
            result_cap: config.engine.result_cap,
            history_cap: config.engine.history_cap,
        };

        let mut engines = Vec::with_capacity(config.services.len());
        for service in &config.services {
            let deps = EngineDeps {
                transport: transport.clone(),
                store: store.clone(),
                clock: clock.clone(),
                metrics: metrics.clone(),
                alerts: Some(alerts.clone()),
                events: events.clone(),
                limits,
            };
            engines.push(Arc::new(ContractTestEngine::from_config(service, deps).await));
        }
        info!(
            services = engines.len(),
            snapshot_dir = %config.engine.snapshot_dir.display(),
            "Supervisor initialized."
        );

        let diagnostics = Arc::new(DiagnosticsProbe::new(transport, clock, &config.diagnostics));
        Ok(Self::new(engines, diagnostics, config.engine.clone()))
    }

    pub fn engine(&self, service_id: &str) -> Option<&Arc<ContractTestEngine>> {
        self.engines.get(service_id)
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<ContractTestEngine>> {
        self.engines.values()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsProbe> {
        &self.diagnostics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The run options configured for scheduled batches.
    pub fn default_run_options(&self) -> RunOptions {
        RunOptions {
            parallel: self.settings.parallel,
        }
    }

    pub async fn run_service(
        &self,
        service_id: &str,
        options: RunOptions,
    ) -> Result<Option<Vec<ContractTestResult>>, EngineError> {
        let engine = self
            .engine(service_id)
            .ok_or_else(|| EngineError::UnknownService(service_id.to_string()))?;
        Ok(engine.run_all(options).await)
    }

    /// Runs one batch on every service concurrently.
    pub async fn run_all_services(
        &self,
        options: RunOptions,
    ) -> BTreeMap<String, Option<Vec<ContractTestResult>>> {
        let batches = join_all(self.engines.values().map(|engine| async move {
            (engine.service_id().to_string(), engine.run_all(options).await)
        }))
        .await;
        batches.into_iter().collect()
    }

    /// Schedules one batch per service after `initial_run_delay_ms`.
    pub fn spawn_initial_runs(&self) -> Vec<JoinHandle<()>> {
        let delay = Duration::from_millis(self.settings.initial_run_delay_ms);
        let options = self.default_run_options();
        self.engines
            .values()
            .map(|engine| engine.spawn_initial_run(delay, options))
            .collect()
    }

    /// Starts one batch per service without waiting for any of them.
    ///
    /// A service whose previous batch is still running skips this round.
    pub fn spawn_runs(&self) -> Vec<JoinHandle<()>> {
        let options = self.default_run_options();
        self.engines
            .values()
            .map(|engine| {
                let engine = Arc::clone(engine);
                tokio::spawn(async move {
                    if engine.run_all(options).await.is_none() {
                        warn!(service = %engine.service_id(), "Previous batch still running; tick skipped.");
                    }
                })
            })
            .collect()
    }

    /// Drives every service until `shutdown` fires.
    ///
    /// The first batch runs `initial_run_delay_ms` after the call, then one
    /// per `poll_interval_ms`. Services are polled independently, so a slow
    /// one never delays the others.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) {
        let delay = Duration::from_millis(self.settings.initial_run_delay_ms);
        let period = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        info!(
            initial_delay_ms = delay.as_millis() as u64,
            interval_ms = period.as_millis() as u64,
            "Starting contract-test poll loop."
        );

        let initial_runs = self.spawn_initial_runs();
        let mut timer = interval_at(Instant::now() + delay + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    for handle in &initial_runs {
                        handle.abort();
                    }
                    for engine in self.engines.values() {
                        engine.abort();
                    }
                    info!("Contract-test poll loop stopped.");
                    return;
                }
                _ = timer.tick() => {
                    self.spawn_runs();
                }
            }
        }
    }
}
