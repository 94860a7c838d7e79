use crate::error::AlerterError;
use async_trait::async_trait;
use configuration::TelegramConfig;
use events::{AlertEvent, AlertReason, ProbeMessage};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
pub mod error;

/// Receives the (at most one) alert raised for each batch run.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError>;
}

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Returns `None` if the token or chat_id is missing from the configuration,
    /// allowing the system to gracefully disable alerting.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::warn!("Telegram alerter is not configured (missing token or chat_id).");
            return None;
        }
        Some(Self {
            client: Client::new(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    /// Sends a text message to the configured Telegram chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2", // Use Markdown for rich formatting
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl AlertSink for TelegramAlerter {
    async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError> {
        self.send_message(&format_alert(event)).await
    }
}

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError> {
        match event.reason {
            AlertReason::StatusFail => tracing::error!(
                service = %event.service_id,
                spec = %event.spec.id,
                reason = %event.reason,
                "{}",
                event.summary_line()
            ),
            AlertReason::SlaSevereLatency => tracing::warn!(
                service = %event.service_id,
                spec = %event.spec.id,
                reason = %event.reason,
                "{}",
                event.summary_line()
            ),
        }
        Ok(())
    }
}

/// Forwards alerts onto a broadcast channel as `ProbeMessage::Alert`.
#[derive(Debug, Clone)]
pub struct BroadcastAlertSink {
    tx: broadcast::Sender<ProbeMessage>,
}

impl BroadcastAlertSink {
    pub fn new(tx: broadcast::Sender<ProbeMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for BroadcastAlertSink {
    async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError> {
        self.tx
            .send(ProbeMessage::Alert(event.clone()))
            .map(|_| ())
            .map_err(|_| AlerterError::NoListeners)
    }
}

/// Delivers every alert to each inner sink. One sink failing does not stop
/// delivery to the others; failures are logged and the fan-out reports success.
#[derive(Default, Clone)]
pub struct AlertFanout {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for AlertFanout {
    async fn dispatch(&self, event: &AlertEvent) -> Result<(), AlerterError> {
        for sink in &self.sinks {
            if let Err(e) = sink.dispatch(event).await {
                tracing::error!(error = ?e, service = %event.service_id, "Failed to deliver alert.");
            }
        }
        Ok(())
    }
}

/// Renders an alert as a Telegram MarkdownV2 message.
pub fn format_alert(event: &AlertEvent) -> String {
    let title = match event.reason {
        AlertReason::StatusFail => "🚨 CONTRACT FAILURE",
        AlertReason::SlaSevereLatency => "⚠️ SEVERE LATENCY",
    };
    let mut message = format!(
        "*{}*\n`{}` / {}\n{}",
        title,
        escape_markdown(&event.service_id),
        escape_markdown(&event.spec.label),
        escape_markdown(&event.summary_line()),
    );
    if let Some(status) = event.result.http_status {
        message.push_str(&format!("\nHTTP `{}`", status));
    }
    message
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"_*[]()~`>#+-=|{}.!";
    special_chars
        .chars()
        .fold(text.to_string(), |s, c| s.replace(c, &format!("\\{}", c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ContractTestResult, ContractTestSpec, TestStatus};
    use events::SpecRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> AlertEvent {
        let spec = ContractTestSpec::new("health", "Health check", "/health");
        let mut result =
            ContractTestResult::new(&spec, TestStatus::Fail, 0).with_message("expected 200 got 503");
        result.http_status = Some(503);
        AlertEvent {
            service_id: "fks_api".to_string(),
            spec: SpecRef::from(&spec),
            result,
            reason: AlertReason::StatusFail,
        }
    }

    struct Failing;

    #[async_trait]
    impl AlertSink for Failing {
        async fn dispatch(&self, _event: &AlertEvent) -> Result<(), AlerterError> {
            Err(AlerterError::ApiError("boom".to_string()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl AlertSink for Counting {
        async fn dispatch(&self, _event: &AlertEvent) -> Result<(), AlerterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("fks_api 1.5x"), "fks\\_api 1\\.5x");
    }

    #[test]
    fn formats_alert_message() {
        let text = format_alert(&event());
        assert!(text.starts_with("*🚨 CONTRACT FAILURE*"));
        assert!(text.contains("`fks\\_api`"));
        assert!(text.ends_with("HTTP `503`"));
    }

    #[test]
    fn telegram_requires_token_and_chat() {
        assert!(TelegramAlerter::new(&TelegramConfig::default()).is_none());
        assert!(
            TelegramAlerter::new(&TelegramConfig {
                token: "t".to_string(),
                chat_id: "c".to_string(),
            })
            .is_some()
        );
    }

    #[tokio::test]
    async fn fanout_keeps_delivering_after_a_failure() {
        let counting = Arc::new(Counting::default());
        let fanout = AlertFanout::new()
            .with(Arc::new(Failing))
            .with(counting.clone())
            .with(Arc::new(LogAlertSink));

        fanout.dispatch(&event()).await.unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(fanout.len(), 3);
    }

    #[tokio::test]
    async fn broadcast_sink_publishes_probe_messages() {
        let (tx, mut rx) = broadcast::channel(4);
        let sink = BroadcastAlertSink::new(tx);

        sink.dispatch(&event()).await.unwrap();
        match rx.recv().await.unwrap() {
            ProbeMessage::Alert(alert) => assert_eq!(alert.reason, AlertReason::StatusFail),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
