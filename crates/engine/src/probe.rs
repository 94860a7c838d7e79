use crate::backoff;
use crate::breaker::BreakerBook;
use crate::clock::Clock;
use crate::metrics::{MetricsSink, SchemaKind};
use crate::validation;
use api_client::error::ApiError;
use api_client::{ProbeRequest, ProbeResponse, ProbeTransport};
use core_types::{ContractTestResult, ContractTestSpec, TestStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a response body was rejected.
enum BodyViolation {
    InvalidJson(String),
    MissingKeys(Vec<String>),
    Schema(String),
    DeepSchema(String),
}

/// Runs one spec against one service and turns the outcome into a result.
///
/// `execute` never fails: every transport error, timeout or rejected body
/// is folded into the returned `ContractTestResult`.
pub struct ProbeExecutor {
    service_id: String,
    transport: Arc<dyn ProbeTransport>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl ProbeExecutor {
    pub fn new(
        service_id: impl Into<String>,
        transport: Arc<dyn ProbeTransport>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            transport,
            clock,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        spec: &ContractTestSpec,
        base_url: &str,
        breakers: &Mutex<BreakerBook>,
        cancel: &CancellationToken,
    ) -> ContractTestResult {
        let result = self.probe(spec, base_url, breakers, cancel).await;

        if result.status != TestStatus::Skip {
            let mut book = breakers.lock().await;
            book.record(
                &spec.id,
                result.status,
                spec.circuit_breaker.as_ref(),
                self.clock.now_ms(),
            );
            self.metrics
                .set_failure_streak(&self.service_id, &spec.id, book.streak(&spec.id));
        }
        self.observe(spec, &result);

        debug!(
            service = %self.service_id,
            spec = %spec.id,
            status = %result.status,
            latency_ms = ?result.latency_ms,
            message = ?result.message,
            "Probe finished."
        );
        result
    }

    async fn probe(
        &self,
        spec: &ContractTestSpec,
        base_url: &str,
        breakers: &Mutex<BreakerBook>,
        cancel: &CancellationToken,
    ) -> ContractTestResult {
        let timestamp = self.clock.now_ms();

        if !spec.enabled.resolve() {
            return ContractTestResult::skip(spec, "disabled", timestamp);
        }
        if spec.auth && !self.transport.is_authenticated() {
            return ContractTestResult::skip(spec, "unauthenticated", timestamp);
        }
        if let Some(config) = &spec.circuit_breaker {
            let open = breakers.lock().await.is_open(&spec.id, config, timestamp);
            if open {
                info!(service = %self.service_id, spec = %spec.id, "Circuit open; skipping probe.");
                return ContractTestResult::skip(spec, "circuit-open", timestamp);
            }
        }

        let request = ProbeRequest {
            method: spec.method,
            url: resolve_url(base_url, &spec.endpoint),
            headers: spec.headers.clone(),
            body: spec.body.clone(),
            auth: spec.auth,
        };

        let started = Instant::now();
        match self.send_with_retry(spec, &request, cancel).await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.evaluate(spec, &response, latency_ms, timestamp)
            }
            Err(e) => {
                warn!(service = %self.service_id, spec = %spec.id, url = %request.url, error = %e, "Probe failed.");
                ContractTestResult::new(spec, TestStatus::Error, timestamp).with_message(e.to_string())
            }
        }
    }

    /// Sends the request, retrying network failures and timeouts with
    /// exponential backoff. Cancellation wins over everything else.
    async fn send_with_retry(
        &self,
        spec: &ContractTestSpec,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> Result<ProbeResponse, ApiError> {
        let timeout_ms = spec.timeout_ms();
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Aborted),
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => Err(ApiError::Timeout(timeout_ms)),
                response = self.transport.send(request) => response,
            };

            let error = match outcome {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= spec.retries => return Err(e),
                Err(e) => e,
            };

            let delay = backoff::retry_delay(spec.retry_delay_ms, attempt);
            debug!(
                service = %self.service_id,
                spec = %spec.id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Probe attempt failed; retrying."
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn evaluate(
        &self,
        spec: &ContractTestSpec,
        response: &ProbeResponse,
        latency_ms: u64,
        timestamp: i64,
    ) -> ContractTestResult {
        let mut result = ContractTestResult::new(spec, TestStatus::Pass, timestamp);
        result.http_status = Some(response.status);
        result.latency_ms = Some(latency_ms);

        if !spec.expected_status.accepts(response.status) {
            result.status = TestStatus::Fail;
            result.message = Some(format!(
                "expected {} got {}",
                spec.expected_status, response.status
            ));
            return result;
        }

        if spec.validates_body() {
            match self.validate_body(spec, response) {
                Ok(()) => {}
                Err(BodyViolation::InvalidJson(e)) => {
                    result.status = TestStatus::Error;
                    result.message = Some(format!("invalid json: {}", e));
                    return result;
                }
                Err(BodyViolation::MissingKeys(keys)) => {
                    result.status = TestStatus::Fail;
                    result.message = Some(format!("missing keys: {}", keys.join(", ")));
                    result.missing_keys = Some(keys);
                    return result;
                }
                Err(BodyViolation::Schema(message)) | Err(BodyViolation::DeepSchema(message)) => {
                    result.status = TestStatus::Fail;
                    result.message = Some(message);
                    return result;
                }
            }
        }

        if let Some(budget) = spec.hard_latency_budget_ms.filter(|&b| latency_ms > b) {
            result.status = TestStatus::Fail;
            result.message = Some(format!(
                "latency budget exceeded ({}ms>{}ms budget)",
                latency_ms, budget
            ));
        } else if let Some(soft) = spec.max_latency_ms.filter(|&m| latency_ms > m) {
            result.message = Some(format!("slow ({}ms>{}ms)", latency_ms, soft));
        }
        result
    }

    fn validate_body(
        &self,
        spec: &ContractTestSpec,
        response: &ProbeResponse,
    ) -> Result<(), BodyViolation> {
        let body = response
            .json()
            .map_err(|e| BodyViolation::InvalidJson(e.to_string()))?;

        let missing = validation::missing_keys(&spec.required_keys, &body);
        if !missing.is_empty() {
            return Err(BodyViolation::MissingKeys(missing));
        }

        if !spec.json_schema.is_empty() {
            let issues = validation::check_shallow(&spec.json_schema, &body);
            if !issues.is_empty() {
                self.metrics
                    .increment_schema_failure(&self.service_id, &spec.id, SchemaKind::Shallow);
                return Err(BodyViolation::Schema(validation::format_issues(
                    "schema", &issues,
                )));
            }
        }

        if let Some(schema) = &spec.json_deep_schema {
            let issues = validation::check_deep(schema, &body);
            if !issues.is_empty() {
                self.metrics
                    .increment_schema_failure(&self.service_id, &spec.id, SchemaKind::Deep);
                return Err(BodyViolation::DeepSchema(validation::format_issues(
                    "deep-schema",
                    &issues,
                )));
            }
        }
        Ok(())
    }

    fn observe(&self, spec: &ContractTestSpec, result: &ContractTestResult) {
        if let Some(latency_ms) = result.latency_ms {
            self.metrics
                .observe_latency(&self.service_id, &spec.id, result.status, latency_ms);
            if spec.sla_ms.is_some_and(|sla| latency_ms > sla) {
                self.metrics.increment_sla_breach(&self.service_id, &spec.id);
            }
        }
        if result.status.is_failure() {
            self.metrics
                .increment_failure(&self.service_id, &spec.id, result.status);
        }
    }
}

/// Joins a service base URL and a spec endpoint. Absolute endpoints are used
/// as they are.
pub fn resolve_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}
