//! Scripted transports for engine tests.

use api_client::error::ApiError;
use api_client::{ProbeRequest, ProbeResponse, ProbeTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Respond(u16, String),
    Fail(String),
    Hang,
}

pub(crate) fn json(status: u16, body: Value) -> Step {
    Step::Respond(status, body.to_string())
}

/// Plays back a list of steps, one per call. The last step repeats once the
/// script runs out.
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProbeRequest>>,
    delay: Option<Duration>,
    authenticated: bool,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
            authenticated: false,
        }
    }

    pub(crate) fn always(step: Step) -> Self {
        Self::new(vec![step])
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ProbeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
            step
        } else {
            last.clone().unwrap_or(Step::Fail("script is empty".to_string()))
        }
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let step = self.next_step();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match step {
            Step::Respond(status, body) => Ok(ProbeResponse::new(status, body.into_bytes())),
            Step::Fail(message) => Err(ApiError::Transport(message)),
            Step::Hang => std::future::pending().await,
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

/// Blocks every call until released, so tests can observe a batch in flight.
#[derive(Default)]
pub(crate) struct GatedTransport {
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
    calls: AtomicUsize,
}

impl GatedTransport {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for GatedTransport {
    async fn send(&self, _request: &ProbeRequest) -> Result<ProbeResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ProbeResponse::new(200, b"{}".to_vec()))
    }
}
