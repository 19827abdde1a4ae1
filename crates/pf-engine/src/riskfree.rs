//! Daily risk-free return series.

use std::collections::BTreeMap;

use pf_data::AttributeStore;
use pf_types::{normalize_to_day, Error, Result, Timestamp};
use tracing::{debug, warn};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Risk-free series built either from a constant annual rate or from the
/// price history of a money-market style instrument.
pub struct RiskFreeRate {
    daily_returns: Vec<f64>,
}

impl RiskFreeRate {
    /// Constant daily series equivalent to `annual_rate` (a fraction, not a
    /// percent) over `trading_days` days.
    pub fn from_annual_rate(annual_rate: f64, trading_days: usize) -> Self {
        let daily = (1.0 + annual_rate).powf(1.0 / TRADING_DAYS_PER_YEAR) - 1.0;
        debug!(annual_rate, daily, trading_days, "constant risk-free series");
        Self {
            daily_returns: vec![daily; trading_days],
        }
    }

    /// Derive the series from an instrument's closes over the calendar's
    /// trading dates. Gaps forward-fill from the last known price; leading
    /// gaps backward-fill from the first known one. Fails when the
    /// instrument has no usable observation at all.
    pub fn from_instrument(
        store: &dyn AttributeStore,
        instrument_id: &str,
        trading_dates: &[Timestamp],
    ) -> Result<Self> {
        if trading_dates.len() < 2 {
            return Err(Error::InvalidInput(
                "need at least 2 trading dates for a risk-free series".to_string(),
            ));
        }

        let history = store.get_attribute_history(
            instrument_id,
            "close",
            trading_dates[0],
            trading_dates[trading_dates.len() - 1],
            None,
        )?;
        let price_map: BTreeMap<Timestamp, f64> = history
            .into_iter()
            .filter_map(|(ts, value)| value.as_f64().map(|v| (normalize_to_day(ts), v)))
            .collect();

        let mut prices = Vec::with_capacity(trading_dates.len());
        let mut last_known = None;
        let mut forward_filled = 0usize;
        for date in trading_dates {
            match price_map.get(&normalize_to_day(*date)) {
                Some(price) => {
                    last_known = Some(*price);
                    prices.push(Some(*price));
                }
                None => {
                    if last_known.is_some() {
                        forward_filled += 1;
                    }
                    prices.push(last_known);
                }
            }
        }

        let first_known = prices.iter().flatten().next().copied().ok_or_else(|| {
            Error::InvalidInput(format!(
                "no price data for risk-free instrument {instrument_id}"
            ))
        })?;
        let backward_filled = prices.iter().filter(|p| p.is_none()).count();
        let filled: Vec<f64> = prices
            .into_iter()
            .map(|p| p.unwrap_or(first_known))
            .collect();

        if forward_filled > 0 {
            warn!(
                instrument = instrument_id,
                count = forward_filled,
                "forward-filled missing risk-free dates"
            );
        }
        if backward_filled > 0 {
            warn!(
                instrument = instrument_id,
                count = backward_filled,
                "backward-filled leading risk-free dates"
            );
        }

        let daily_returns = filled
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) / pair[0])
            .collect();

        Ok(Self { daily_returns })
    }

    pub fn daily_returns(&self) -> &[f64] {
        &self.daily_returns
    }

    pub fn mean_daily_return(&self) -> f64 {
        if self.daily_returns.is_empty() {
            return 0.0;
        }
        self.daily_returns.iter().sum::<f64>() / self.daily_returns.len() as f64
    }

    /// `(1 + mean_daily)^252 - 1`, as a fraction.
    pub fn annualized_return(&self) -> f64 {
        if self.daily_returns.is_empty() {
            return 0.0;
        }
        (1.0 + self.mean_daily_return()).powf(TRADING_DAYS_PER_YEAR) - 1.0
    }
}
