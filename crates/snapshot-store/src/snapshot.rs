use core_types::{ContractTestResult, SpecOverride};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted state of one service: `{ "results": [...], "history": { specId: [ms, ...] } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    #[serde(default)]
    pub results: Vec<ContractTestResult>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<u64>>,
}

impl ServiceSnapshot {
    /// Drops the oldest entries so the snapshot respects the engine's rolling caps.
    pub fn trim(&mut self, result_cap: usize, history_cap: usize) {
        if self.results.len() > result_cap {
            let excess = self.results.len() - result_cap;
            self.results.drain(..excess);
        }
        for samples in self.history.values_mut() {
            if samples.len() > history_cap {
                let excess = samples.len() - history_cap;
                samples.drain(..excess);
            }
        }
    }
}

/// Runtime overrides keyed by spec id.
pub type OverrideMap = BTreeMap<String, SpecOverride>;
