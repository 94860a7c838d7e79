use analytics::CircuitView;
use core_types::{CircuitBreakerConfig, ContractTestSpec, TestStatus};
use std::collections::HashMap;

/// Consecutive-failure bookkeeping for one spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub streak: u32,
    /// Epoch milliseconds at which the circuit last opened.
    pub opened_at: Option<i64>,
}

impl CircuitBreakerState {
    pub fn is_open(&self, config: &CircuitBreakerConfig, now_ms: i64) -> bool {
        self.remaining_cooldown_ms(config, now_ms) > 0
    }

    pub fn remaining_cooldown_ms(&self, config: &CircuitBreakerConfig, now_ms: i64) -> u64 {
        match self.opened_at {
            Some(opened_at) => {
                let elapsed = now_ms.saturating_sub(opened_at).max(0) as u64;
                config.cooldown_ms.saturating_sub(elapsed)
            }
            None => 0,
        }
    }
}

/// Breaker state for every spec of one engine, keyed by spec id.
///
/// Session scoped: nothing here is persisted. Streaks are tracked for every
/// spec so they can be reported, but circuits only open for specs that carry
/// a `CircuitBreakerConfig`.
#[derive(Debug, Default)]
pub struct BreakerBook {
    states: HashMap<String, CircuitBreakerState>,
}

impl BreakerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, spec_id: &str) -> CircuitBreakerState {
        self.states.get(spec_id).copied().unwrap_or_default()
    }

    pub fn streak(&self, spec_id: &str) -> u32 {
        self.state(spec_id).streak
    }

    pub fn is_open(&self, spec_id: &str, config: &CircuitBreakerConfig, now_ms: i64) -> bool {
        self.state(spec_id).is_open(config, now_ms)
    }

    /// Folds one probe outcome into the spec's state.
    ///
    /// A failure that reaches the threshold while the circuit is not
    /// currently open stamps `opened_at`. That covers both the first trip and
    /// a failed probe after the cooldown, which reopens the circuit.
    pub fn record(
        &mut self,
        spec_id: &str,
        status: TestStatus,
        config: Option<&CircuitBreakerConfig>,
        now_ms: i64,
    ) {
        match status {
            TestStatus::Skip => {}
            TestStatus::Pass => {
                self.states.insert(spec_id.to_string(), CircuitBreakerState::default());
            }
            TestStatus::Fail | TestStatus::Error => {
                let state = self.states.entry(spec_id.to_string()).or_default();
                state.streak = state.streak.saturating_add(1);
                if let Some(config) = config {
                    if state.streak >= config.failure_threshold && !state.is_open(config, now_ms) {
                        state.opened_at = Some(now_ms);
                    }
                }
            }
        }
    }

    /// Drops state for specs that are no longer declared.
    pub fn retain(&mut self, specs: &[ContractTestSpec]) {
        self.states
            .retain(|id, _| specs.iter().any(|spec| &spec.id == id));
    }

    pub fn views(&self, specs: &[ContractTestSpec], now_ms: i64) -> Vec<CircuitView> {
        specs
            .iter()
            .map(|spec| {
                let state = self.state(&spec.id);
                let remaining = spec
                    .circuit_breaker
                    .as_ref()
                    .map(|config| state.remaining_cooldown_ms(config, now_ms))
                    .unwrap_or(0);
                CircuitView {
                    id: spec.id.clone(),
                    streak: state.streak,
                    open: remaining > 0,
                    remaining_cooldown_ms: remaining,
                }
            })
            .collect()
    }

    pub fn open_count(&self, specs: &[ContractTestSpec], now_ms: i64) -> usize {
        specs
            .iter()
            .filter(|spec| match &spec.circuit_breaker {
                Some(config) => self.is_open(&spec.id, config, now_ms),
                None => false,
            })
            .count()
    }
}
