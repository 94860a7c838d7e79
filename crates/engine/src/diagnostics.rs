use crate::clock::Clock;
use crate::error::DiagnosticsError;
use api_client::error::ApiError;
use api_client::{ProbeRequest, ProbeTransport};
use configuration::DiagnosticsConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Samples averaged on each side of the trend comparison.
const TREND_WINDOW: usize = 5;

/// One GET against a diagnostics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSample {
    /// A 2xx response was received.
    pub ok: bool,
    pub status_code: Option<u16>,
    /// Body size in bytes.
    pub size: Option<usize>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointReport {
    pub name: String,
    pub url: String,
    pub samples: usize,
    pub last: Option<DiagnosticSample>,
    pub avg_duration_ms: Option<f64>,
    /// Positive when the endpoint is getting slower.
    pub trend_ms: Option<f64>,
}

/// Ad-hoc latency sampling for named endpoints.
///
/// Unlike contract tests there are no retries, breakers or body checks; a
/// sample records whatever happened.
pub struct DiagnosticsProbe {
    transport: Arc<dyn ProbeTransport>,
    clock: Arc<dyn Clock>,
    endpoints: BTreeMap<String, String>,
    samples: Mutex<HashMap<String, VecDeque<DiagnosticSample>>>,
    sample_cap: usize,
    timeout: Duration,
}

impl DiagnosticsProbe {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        clock: Arc<dyn Clock>,
        config: &DiagnosticsConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            endpoints: config.endpoints.clone(),
            samples: Mutex::new(HashMap::new()),
            sample_cap: config.sample_cap,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, url: impl Into<String>) {
        self.endpoints.insert(name.into(), url.into());
    }

    pub fn endpoints(&self) -> &BTreeMap<String, String> {
        &self.endpoints
    }

    pub async fn sample(&self, name: &str) -> Result<DiagnosticSample, DiagnosticsError> {
        let url = self
            .endpoints
            .get(name)
            .ok_or_else(|| DiagnosticsError::UnknownEndpoint(name.to_string()))?;

        let timestamp = self.clock.now_ms();
        let request = ProbeRequest::get(url.clone());
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::Timeout(self.timeout.as_millis() as u64)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let sample = match outcome {
            Ok(response) => DiagnosticSample {
                ok: response.is_success(),
                status_code: Some(response.status),
                size: Some(response.size()),
                error: None,
                duration_ms,
                timestamp,
            },
            Err(e) => DiagnosticSample {
                ok: false,
                status_code: None,
                size: None,
                error: Some(e.to_string()),
                duration_ms,
                timestamp,
            },
        };
        debug!(endpoint = name, ok = sample.ok, duration_ms, "Diagnostics sample taken.");

        let mut samples = self.samples.lock().await;
        let history = samples.entry(name.to_string()).or_default();
        history.push_back(sample.clone());
        while history.len() > self.sample_cap {
            history.pop_front();
        }
        Ok(sample)
    }

    /// Recorded samples for `name`, oldest first.
    pub async fn samples(&self, name: &str) -> Result<Vec<DiagnosticSample>, DiagnosticsError> {
        self.ensure_known(name)?;
        Ok(self
            .samples
            .lock()
            .await
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn trend(&self, name: &str) -> Result<Option<f64>, DiagnosticsError> {
        let durations: Vec<u64> = self
            .samples(name)
            .await?
            .iter()
            .map(|s| s.duration_ms)
            .collect();
        Ok(trend_delta(&durations))
    }

    pub async fn report(&self) -> Vec<EndpointReport> {
        let samples = self.samples.lock().await;
        self.endpoints
            .iter()
            .map(|(name, url)| {
                let recorded = samples.get(name);
                let durations: Vec<u64> = recorded
                    .map(|s| s.iter().map(|d| d.duration_ms).collect())
                    .unwrap_or_default();
                EndpointReport {
                    name: name.clone(),
                    url: url.clone(),
                    samples: durations.len(),
                    last: recorded.and_then(|s| s.back().cloned()),
                    avg_duration_ms: mean(&durations),
                    trend_ms: trend_delta(&durations),
                }
            })
            .collect()
    }

    fn ensure_known(&self, name: &str) -> Result<(), DiagnosticsError> {
        if self.endpoints.contains_key(name) {
            Ok(())
        } else {
            Err(DiagnosticsError::UnknownEndpoint(name.to_string()))
        }
    }
}

fn mean(values: &[u64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<u64>() as f64 / values.len() as f64)
}

/// Average of the last five durations minus the average of the five before
/// them. `None` until ten samples exist.
pub fn trend_delta(durations: &[u64]) -> Option<f64> {
    if durations.len() < TREND_WINDOW * 2 {
        return None;
    }
    let split = durations.len() - TREND_WINDOW;
    let recent = mean(&durations[split..])?;
    let previous = mean(&durations[split - TREND_WINDOW..split])?;
    Some(recent - previous)
}
