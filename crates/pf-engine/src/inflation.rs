//! Monthly inflation series and real-return adjustment.

use std::collections::BTreeMap;

use chrono::Datelike;
use pf_data::AttributeStore;
use pf_types::{month_key, Result, Timestamp};
use tracing::{info, warn};

/// Cumulative-inflation calculator over `YYYY-MM` bins.
///
/// Built from the inflation instrument's `close` series (monthly percent
/// readings; the latest observation within a month wins). An empty series
/// is valid and turns every adjustment into the identity.
pub struct InflationAdjuster {
    monthly: BTreeMap<String, f64>,
}

impl InflationAdjuster {
    pub fn empty() -> Self {
        Self {
            monthly: BTreeMap::new(),
        }
    }

    /// Build directly from a prepared `YYYY-MM -> percent` map.
    pub fn from_monthly(monthly: BTreeMap<String, f64>) -> Self {
        Self { monthly }
    }

    pub fn load(
        store: &dyn AttributeStore,
        instrument_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Self> {
        let history = store.get_attribute_history(instrument_id, "close", start, end, None)?;
        if history.is_empty() {
            warn!(
                instrument = instrument_id,
                "no inflation data found, adjustment disabled"
            );
            return Ok(Self::empty());
        }

        let mut monthly = BTreeMap::new();
        for (ts, value) in history {
            if let Some(rate) = value.as_f64() {
                monthly.insert(month_key(ts), rate);
            }
        }
        info!(
            instrument = instrument_id,
            months = monthly.len(),
            "inflation data loaded"
        );
        Ok(Self { monthly })
    }

    pub fn has_data(&self) -> bool {
        !self.monthly.is_empty()
    }

    /// Percent inflation rate recorded for a month; missing months
    /// contribute zero.
    pub fn monthly_rate(&self, key: &str) -> f64 {
        self.monthly.get(key).copied().unwrap_or(0.0)
    }

    /// Compounded inflation over whole months from `month(start)` to
    /// `month(end)` inclusive, in percent.
    pub fn cumulative_inflation(&self, start: Timestamp, end: Timestamp) -> f64 {
        if self.monthly.is_empty() || end <= start {
            return 0.0;
        }

        let mut factor = 1.0;
        let (mut year, mut month) = (start.year(), start.month());
        let (end_year, end_month) = (end.year(), end.month());

        while (year, month) <= (end_year, end_month) {
            let key = format!("{year:04}-{month:02}");
            factor *= 1.0 + self.monthly_rate(&key) / 100.0;
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }

        (factor - 1.0) * 100.0
    }

    /// Fisher deflation of a nominal percent return; identity when no data
    /// is loaded.
    pub fn adjust_return(&self, nominal_pct: f64, start: Timestamp, end: Timestamp) -> f64 {
        if self.monthly.is_empty() {
            return nominal_pct;
        }

        let inflation_multiplier = 1.0 + self.cumulative_inflation(start, end) / 100.0;
        if inflation_multiplier == 0.0 {
            return nominal_pct;
        }

        ((1.0 + nominal_pct / 100.0) / inflation_multiplier - 1.0) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_data::InMemoryStore;
    use pf_types::civil_day;

    fn adjuster(rates: &[(i32, u32, f64)]) -> InflationAdjuster {
        InflationAdjuster::from_monthly(
            rates
                .iter()
                .map(|(y, m, r)| (format!("{y:04}-{m:02}"), *r))
                .collect(),
        )
    }

    #[test]
    fn empty_series_is_the_identity() {
        let adjuster = InflationAdjuster::empty();
        let start = civil_day(2023, 1, 10).unwrap();
        let end = civil_day(2023, 12, 10).unwrap();
        assert_eq!(adjuster.cumulative_inflation(start, end), 0.0);
        assert_eq!(adjuster.adjust_return(12.5, start, end), 12.5);
    }

    #[test]
    fn months_compound_inclusively() {
        let adjuster = adjuster(&[(2023, 1, 1.0), (2023, 2, 1.0), (2023, 3, 2.0)]);
        let start = civil_day(2023, 1, 15).unwrap();
        let end = civil_day(2023, 3, 2).unwrap();
        let expected = (1.01_f64 * 1.01 * 1.02 - 1.0) * 100.0;
        assert!((adjuster.cumulative_inflation(start, end) - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_months_contribute_zero() {
        let adjuster = adjuster(&[(2023, 1, 2.0)]);
        let start = civil_day(2023, 1, 1).unwrap();
        let end = civil_day(2023, 3, 31).unwrap();
        assert!((adjuster.cumulative_inflation(start, end) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn year_rollover_walks_december_into_january() {
        let adjuster = adjuster(&[(2022, 12, 1.0), (2023, 1, 1.0)]);
        let start = civil_day(2022, 12, 20).unwrap();
        let end = civil_day(2023, 1, 10).unwrap();
        let expected = (1.01_f64 * 1.01 - 1.0) * 100.0;
        assert!((adjuster.cumulative_inflation(start, end) - expected).abs() < 1e-9);
    }

    #[test]
    fn fisher_deflation() {
        let adjuster = adjuster(&[(2023, 1, 10.0)]);
        let start = civil_day(2023, 1, 1).unwrap();
        let end = civil_day(2023, 1, 31).unwrap();
        // 21% nominal against 10% inflation = 10% real
        let real = adjuster.adjust_return(21.0, start, end);
        assert!((real - 10.0).abs() < 1e-9);
    }

    #[test]
    fn latest_observation_within_a_month_wins() {
        let store = InMemoryStore::new();
        store.save_instrument("INF", "CPI", "macro", "stats").unwrap();
        store
            .save_attribute("INF", "close", "stats", civil_day(2023, 1, 10).unwrap(), 0.5.into())
            .unwrap();
        store
            .save_attribute("INF", "close", "stats", civil_day(2023, 1, 31).unwrap(), 0.9.into())
            .unwrap();

        let adjuster = InflationAdjuster::load(
            &store,
            "INF",
            civil_day(2023, 1, 1).unwrap(),
            civil_day(2023, 2, 1).unwrap(),
        )
        .unwrap();
        assert!(adjuster.has_data());
        assert!((adjuster.monthly_rate("2023-01") - 0.9).abs() < 1e-9);
    }
}
