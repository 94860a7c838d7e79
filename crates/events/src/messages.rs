use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{ContractTestResult, ContractTestSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Enum representing the severity of a log message for structured logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured log message for event consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Why an alert was raised for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertReason {
    /// At least one result in the batch was a contract failure.
    StatusFail,
    /// A spec exceeded 1.5x its SLA latency.
    SlaSevereLatency,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::StatusFail => "status-fail",
            AlertReason::SlaSevereLatency => "sla-severe-latency",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The serializable identity of the spec an alert refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecRef {
    pub id: String,
    pub label: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_ms: Option<u64>,
}

impl From<&ContractTestSpec> for SpecRef {
    fn from(spec: &ContractTestSpec) -> Self {
        Self {
            id: spec.id.clone(),
            label: spec.label.clone(),
            endpoint: spec.endpoint.clone(),
            sla_ms: spec.sla_ms,
        }
    }
}

/// The single alert emitted for a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub service_id: String,
    pub spec: SpecRef,
    pub result: ContractTestResult,
    pub reason: AlertReason,
}

impl AlertEvent {
    /// A one-line human readable description, used by log and chat sinks.
    pub fn summary_line(&self) -> String {
        match self.reason {
            AlertReason::StatusFail => format!(
                "{} / {} failed: {}",
                self.service_id,
                self.spec.label,
                self.result.message.as_deref().unwrap_or("no details"),
            ),
            AlertReason::SlaSevereLatency => format!(
                "{} / {} latency {}ms is over 1.5x its {}ms SLA",
                self.service_id,
                self.spec.label,
                self.result.latency_ms.unwrap_or_default(),
                self.spec.sla_ms.unwrap_or_default(),
            ),
        }
    }
}

/// Notification that a service finished a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompleted {
    pub run_id: Uuid,
    pub service_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub parallel: bool,
    pub results: Vec<ContractTestResult>,
}

/// The top-level event enum broadcast by the engine.
///
/// Serialized with `#[serde(tag = "type", content = "payload")]`, so an alert
/// looks like `{"type": "Alert", "payload": {"serviceId": "...", ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProbeMessage {
    /// A structured log message.
    Log(LogMessage),
    /// The one alert raised for a batch.
    Alert(AlertEvent),
    /// A batch finished and its results were recorded.
    BatchCompleted(BatchCompleted),
}

impl ProbeMessage {
    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }
}
