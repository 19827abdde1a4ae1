//! Performance metrics assembly.
//!
//! Turns the recorded daily portfolio values (plus dividend, tax, and
//! inflation inputs) into the final [`BacktestResult`] record.

use pf_types::{
    BacktestResult, InflationReport, TaxReport, TaxSummary, Timestamp, TradeRecord,
};

use crate::inflation::InflationAdjuster;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Everything the assembler needs from the finished run.
pub struct MetricsInput<'a> {
    pub daily_values: Vec<f64>,
    pub trades: Vec<TradeRecord>,
    pub initial_capital: f64,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Gross dividends attributed over the run.
    pub total_dividends: f64,
    pub dividend_payments: u64,
    /// Annual risk-free rate in percent, for the Sharpe ratio.
    pub risk_free_pct: f64,
    /// Cash actually paid in tax plus the final year's summary.
    pub tax: Option<(f64, TaxSummary)>,
    pub inflation: Option<&'a InflationAdjuster>,
}

pub fn assemble(input: MetricsInput<'_>) -> BacktestResult {
    let mut result = BacktestResult::default();

    let capital = input.initial_capital;
    result.final_value = input.daily_values.last().copied().unwrap_or(capital);
    result.trading_days = (input.end - input.start).num_days();

    if capital > 0.0 {
        result.total_return_pct = (result.final_value - capital) / capital * 100.0;
    }

    let years = result.trading_days as f64 / DAYS_PER_YEAR;
    if years > 0.0 && capital > 0.0 && result.final_value > 0.0 {
        result.annualized_return_pct =
            ((result.final_value / capital).powf(1.0 / years) - 1.0) * 100.0;
    }

    let returns = daily_returns(&input.daily_values);
    result.volatility_pct = volatility_pct(&returns);
    result.max_drawdown_pct = max_drawdown_pct(&input.daily_values);

    if result.volatility_pct > 0.0 {
        result.sharpe_ratio =
            (result.annualized_return_pct - input.risk_free_pct) / result.volatility_pct;
    }

    result.total_dividends = input.total_dividends;
    result.dividend_payments = input.dividend_payments;
    if capital > 0.0 {
        result.dividend_yield_pct = input.total_dividends / capital * 100.0;
    }

    if let Some((total_taxes_paid, summary)) = input.tax {
        // taxes were deducted from cash during the run, so the after-tax
        // final value is the final value itself
        let after_tax_return_pct = result.total_return_pct;
        let tax_efficiency_pct = if result.total_return_pct > 0.0 {
            Some(after_tax_return_pct / result.total_return_pct * 100.0)
        } else {
            None
        };
        result.tax = Some(TaxReport {
            total_taxes_paid,
            after_tax_return_pct,
            tax_efficiency_pct,
            summary,
        });
    }

    if let Some(adjuster) = input.inflation {
        if adjuster.has_data() {
            let cumulative = adjuster.cumulative_inflation(input.start, input.end);
            let real_final_value = result.final_value / (1.0 + cumulative / 100.0);
            let real_total_return_pct =
                adjuster.adjust_return(result.total_return_pct, input.start, input.end);
            let real_annualized_return_pct =
                if years > 0.0 && capital > 0.0 && real_final_value > 0.0 {
                    ((real_final_value / capital).powf(1.0 / years) - 1.0) * 100.0
                } else {
                    0.0
                };
            result.inflation = Some(InflationReport {
                cumulative_inflation_pct: cumulative,
                real_final_value,
                real_total_return_pct,
                real_annualized_return_pct,
            });
        }
    }

    result.daily_values = input.daily_values;
    result.trades = input.trades;
    result
}

fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect()
}

/// Population standard deviation of daily returns, annualized by √252, in
/// percent.
fn volatility_pct(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / returns.len() as f64;
    (variance * TRADING_DAYS_PER_YEAR).sqrt() * 100.0
}

fn max_drawdown_pct(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_drawdown = 0.0;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak * 100.0;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_types::civil_day;

    fn input(values: Vec<f64>, capital: f64) -> MetricsInput<'static> {
        MetricsInput {
            daily_values: values,
            trades: Vec::new(),
            initial_capital: capital,
            start: civil_day(2023, 1, 2).unwrap(),
            end: civil_day(2023, 12, 29).unwrap(),
            total_dividends: 0.0,
            dividend_payments: 0,
            risk_free_pct: 7.0,
            tax: None,
            inflation: None,
        }
    }

    #[test]
    fn constant_values_produce_flat_metrics() {
        let result = assemble(input(vec![100.0; 10], 100.0));
        assert_eq!(result.total_return_pct, 0.0);
        assert_eq!(result.volatility_pct, 0.0);
        assert_eq!(result.max_drawdown_pct, 0.0);
        assert_eq!(result.sharpe_ratio, 0.0);
    }

    #[test]
    fn final_value_is_the_last_daily_value() {
        let result = assemble(input(vec![100_000.0, 104_000.0, 109_000.0], 100_000.0));
        assert_eq!(result.final_value, 109_000.0);
        assert!((result.total_return_pct - 9.0).abs() < 1e-9);
        assert_eq!(result.max_drawdown_pct, 0.0);
        assert!(result.volatility_pct > 0.0);
    }

    #[test]
    fn drawdown_measures_from_the_running_peak() {
        let result = assemble(input(vec![100.0, 120.0, 90.0, 110.0], 100.0));
        // peak 120, trough 90
        assert!((result.max_drawdown_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn volatility_uses_population_stddev() {
        let values = vec![100.0, 110.0, 99.0];
        let result = assemble(input(values, 100.0));
        let r1: f64 = 0.1;
        let r2: f64 = (99.0 - 110.0) / 110.0;
        let mean = (r1 + r2) / 2.0;
        let variance = ((r1 - mean).powi(2) + (r2 - mean).powi(2)) / 2.0;
        let expected = (variance * 252.0).sqrt() * 100.0;
        assert!((result.volatility_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn dividend_yield_relates_gross_to_capital() {
        let mut metrics_input = input(vec![100_000.0, 110_000.0], 100_000.0);
        metrics_input.total_dividends = 10_000.0;
        metrics_input.dividend_payments = 1;
        let result = assemble(metrics_input);
        assert!((result.dividend_yield_pct - 10.0).abs() < 1e-9);
        assert_eq!(result.dividend_payments, 1);
    }

    #[test]
    fn tax_block_reports_efficiency_only_for_positive_returns() {
        let mut metrics_input = input(vec![100.0, 90.0], 100.0);
        metrics_input.tax = Some((26.0, TaxSummary::default()));
        let result = assemble(metrics_input);
        let report = result.tax.unwrap();
        assert_eq!(report.total_taxes_paid, 26.0);
        assert!(report.tax_efficiency_pct.is_none());
    }

    #[test]
    fn inflation_block_deflates_final_value() {
        let adjuster = InflationAdjuster::from_monthly(
            [("2023-01".to_string(), 10.0)].into_iter().collect(),
        );

        let metrics_input = MetricsInput {
            daily_values: vec![100.0, 121.0],
            trades: Vec::new(),
            initial_capital: 100.0,
            start: civil_day(2023, 1, 2).unwrap(),
            end: civil_day(2023, 1, 31).unwrap(),
            total_dividends: 0.0,
            dividend_payments: 0,
            risk_free_pct: 7.0,
            tax: None,
            inflation: Some(&adjuster),
        };

        let result = assemble(metrics_input);
        let report = result.inflation.unwrap();
        assert!((report.cumulative_inflation_pct - 10.0).abs() < 1e-9);
        assert!((report.real_final_value - 110.0).abs() < 1e-9);
        assert!((report.real_total_return_pct - 10.0).abs() < 1e-9);
    }
}
