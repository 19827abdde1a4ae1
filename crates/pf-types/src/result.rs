use serde::{Deserialize, Serialize};

use crate::trade::TradeRecord;

/// One tax year's totals, produced by the tax calculator's year-end step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaxSummary {
    pub total_gains: f64,
    pub total_losses: f64,
    pub net_gain: f64,
    pub exempt_gain: f64,
    pub taxable_gain: f64,
    pub capital_gains_tax: f64,

    pub total_dividends: f64,
    pub dividend_tax: f64,

    pub carryforward_loss: f64,
    pub carryforward_used: f64,

    pub total_tax: f64,

    pub profitable_transactions: u64,
    pub losing_transactions: u64,
    pub exempt_transactions: u64,
}

/// Tax outcome of a full back-test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxReport {
    /// Cash actually handed over during the run (year-end settlements).
    pub total_taxes_paid: f64,
    pub after_tax_return_pct: f64,
    /// After-tax return as a share of the pre-tax return, when the latter is
    /// positive.
    pub tax_efficiency_pct: Option<f64>,
    /// The final tax year's summary.
    pub summary: TaxSummary,
}

/// Inflation-adjusted view of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InflationReport {
    pub cumulative_inflation_pct: f64,
    pub real_final_value: f64,
    pub real_total_return_pct: f64,
    pub real_annualized_return_pct: f64,
}

/// Output record of one back-test.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    pub final_value: f64,
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub volatility_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    /// Calendar-day span of the requested window.
    pub trading_days: i64,

    /// Gross dividends attributed over the run.
    pub total_dividends: f64,
    pub dividend_payments: u64,
    pub dividend_yield_pct: f64,

    /// Portfolio value after each trading day, in calendar order.
    pub daily_values: Vec<f64>,
    /// Deterministic trade log.
    pub trades: Vec<TradeRecord>,

    pub tax: Option<TaxReport>,
    pub inflation: Option<InflationReport>,
}
