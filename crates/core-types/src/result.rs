use crate::enums::TestStatus;
use crate::spec::ContractTestSpec;
use serde::{Deserialize, Serialize};

/// The immutable outcome of running one spec once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractTestResult {
    pub id: String,
    pub label: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Set only when a response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_keys: Option<Vec<String>>,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl ContractTestResult {
    pub fn new(spec: &ContractTestSpec, status: TestStatus, timestamp: i64) -> Self {
        Self {
            id: spec.id.clone(),
            label: spec.label.clone(),
            status,
            http_status: None,
            latency_ms: None,
            message: None,
            missing_keys: None,
            timestamp,
        }
    }

    pub fn skip(spec: &ContractTestSpec, reason: &str, timestamp: i64) -> Self {
        Self::new(spec, TestStatus::Skip, timestamp).with_message(reason)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_empty_fields() {
        let spec = ContractTestSpec::new("health", "Health", "/health");
        let mut result = ContractTestResult::new(&spec, TestStatus::Pass, 1_700_000_000_000);
        result.http_status = Some(200);
        result.latency_ms = Some(42);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["httpStatus"], 200);
        assert_eq!(json["latencyMs"], 42);
        assert!(json.get("missingKeys").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn skip_carries_reason() {
        let spec = ContractTestSpec::new("health", "Health", "/health");
        let result = ContractTestResult::skip(&spec, "disabled", 0);
        assert_eq!(result.status, TestStatus::Skip);
        assert_eq!(result.message.as_deref(), Some("disabled"));
    }
}
