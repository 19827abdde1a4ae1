use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Outcome of a single buy/sell decision returned by a strategy.
///
/// All-zero means "no trade". The driver applies a non-zero result
/// atomically; strategies never mutate holdings or cash themselves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeResult {
    pub shares: u64,
    pub price: f64,
    pub total: f64,
    pub reason: String,
}

impl TradeResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(shares: u64, price: f64, reason: &str) -> Self {
        Self {
            shares,
            price,
            total: shares as f64 * price,
            reason: reason.to_string(),
        }
    }

    pub fn is_trade(&self) -> bool {
        self.shares > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One entry of the deterministic trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: Timestamp,
    pub instrument_id: String,
    pub side: TradeSide,
    pub shares: u64,
    pub price: f64,
    pub total: f64,
    pub reason: String,
}
