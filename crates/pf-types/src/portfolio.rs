use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Input definition of a back-test: what to hold, with what weights, and the
/// strategy's text-keyed tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioParams {
    /// Instrument order is observable: it fixes the trade-log order and
    /// breaks ties in rebalancing.
    pub instrument_ids: Vec<String>,
    /// Target weights; ids missing here default to equal weight.
    pub weights: BTreeMap<String, f64>,
    pub initial_capital: f64,
    pub reinvest_dividends: bool,
    /// Strategy tunables and engine options, all as text.
    pub parameters: BTreeMap<String, String>,
}

impl PortfolioParams {
    pub fn new(instrument_ids: Vec<String>, initial_capital: f64) -> Self {
        Self {
            instrument_ids,
            weights: BTreeMap::new(),
            initial_capital,
            reinvest_dividends: false,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, id: &str, weight: f64) -> Self {
        self.weights.insert(id.to_string(), weight);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    /// Parameter lookup with a default, mirroring how strategies read their
    /// tunables.
    pub fn parameter(&self, key: &str, default: &str) -> String {
        self.parameters
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Normalized target weights over the participating instruments.
    ///
    /// Ids absent from the weight map get the equal-weight default; the
    /// result always sums to 1 (for a non-empty instrument list).
    pub fn normalized_weights(&self) -> BTreeMap<String, f64> {
        let n = self.instrument_ids.len();
        if n == 0 {
            return BTreeMap::new();
        }

        let equal = 1.0 / n as f64;
        let mut raw: BTreeMap<String, f64> = BTreeMap::new();
        for id in &self.instrument_ids {
            let w = self.weights.get(id).copied().unwrap_or(equal).max(0.0);
            raw.insert(id.clone(), w);
        }

        let total: f64 = raw.values().sum();
        if total > 0.0 {
            for w in raw.values_mut() {
                *w /= total;
            }
        } else {
            for w in raw.values_mut() {
                *w = equal;
            }
        }

        raw
    }
}
