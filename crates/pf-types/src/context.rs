use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::ContextError;
use crate::time::Timestamp;

/// Share counts below this are treated as zero; holdings and lots are
/// integer-valued, the f64 representation only exists for arithmetic.
pub const SHARE_EPSILON: f64 = 1e-4;

/// One dividend payment attributable to holders on its ex-date.
#[derive(Debug, Clone, PartialEq)]
pub struct DividendPayment {
    pub ex_date: Timestamp,
    pub per_share: f64,
}

/// A purchase record used for tax-basis tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxLot {
    pub purchase_date: Timestamp,
    pub quantity: f64,
    pub cost_basis: f64,
}

/// First/last coverage of an instrument's price series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInfo {
    pub first_date: Timestamp,
    pub last_date: Timestamp,
    pub last_price: f64,
}

/// Typed value stored in the strategy property bag.
///
/// The tag set is closed: floats, integers, text, and opaque blobs. Stored
/// values use shared ownership so a handle obtained by a strategy stays
/// valid while the rest of the context is mutated.
#[derive(Clone)]
pub enum Property {
    Float(f64),
    Int(i64),
    Text(Arc<str>),
    Blob(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Property::Float(v) => write!(f, "Float({v})"),
            Property::Int(v) => write!(f, "Int({v})"),
            Property::Text(v) => write!(f, "Text({v:?})"),
            Property::Blob(_) => write!(f, "Blob(..)"),
        }
    }
}

/// All mutable state of one running back-test.
///
/// Created by the driver at the start of a run, mutated only by the driver
/// (strategies read it and return [`crate::TradeResult`]s), and dropped when
/// the result record is produced. Price and dividend maps are immutable once
/// loaded; holdings, cash, and lots change as trades are applied.
#[derive(Debug, Default)]
pub struct TradingContext {
    pub current_date: Option<Timestamp>,
    pub day_index: usize,
    pub is_rebalance_day: bool,
    pub is_last_day: bool,
    pub is_reinvestment: bool,
    pub cash_balance: f64,

    /// Instrument -> integer share count (stored as f64).
    pub holdings: BTreeMap<String, f64>,
    /// Instrument -> date -> closing price; only dates present in the store.
    pub price_data: BTreeMap<String, BTreeMap<Timestamp, f64>>,
    /// Instrument -> ex-date-sorted dividend payments.
    pub dividend_data: BTreeMap<String, Vec<DividendPayment>>,
    /// Instrument -> open tax lots in purchase order.
    pub tax_lots: BTreeMap<String, Vec<TaxLot>>,

    properties: BTreeMap<String, Property>,
}

impl TradingContext {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash_balance: initial_capital,
            ..Default::default()
        }
    }

    pub fn holding(&self, instrument_id: &str) -> f64 {
        self.holdings.get(instrument_id).copied().unwrap_or(0.0)
    }

    /// Exact-date closing price.
    pub fn price_on(&self, instrument_id: &str, date: Timestamp) -> Option<f64> {
        self.price_data.get(instrument_id)?.get(&date).copied()
    }

    /// Last closing price at or before `date` (forward fill).
    pub fn last_known_price(&self, instrument_id: &str, date: Timestamp) -> Option<f64> {
        self.price_data
            .get(instrument_id)?
            .range(..=date)
            .next_back()
            .map(|(_, price)| *price)
    }

    pub fn price_info(&self, instrument_id: &str) -> Option<PriceInfo> {
        let prices = self.price_data.get(instrument_id)?;
        let (first_date, _) = prices.iter().next()?;
        let (last_date, last_price) = prices.iter().next_back()?;
        Some(PriceInfo {
            first_date: *first_date,
            last_date: *last_date,
            last_price: *last_price,
        })
    }

    /// An instrument is delisted once the clock has moved past its last
    /// known observation.
    pub fn is_delisted(&self, instrument_id: &str, date: Timestamp) -> bool {
        match self.price_info(instrument_id) {
            Some(info) => date > info.last_date,
            None => false,
        }
    }

    /// Cash plus the forward-filled market value of all holdings as of
    /// `current_date`.
    pub fn portfolio_value(&self) -> f64 {
        let mut total = self.cash_balance;
        let Some(date) = self.current_date else {
            return total;
        };
        for (id, shares) in &self.holdings {
            if *shares > SHARE_EPSILON {
                if let Some(price) = self.last_known_price(id, date) {
                    total += shares * price;
                }
            }
        }
        total
    }

    // --- property bag ---

    pub fn set_property(&mut self, key: &str, value: Property) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Result<(), ContextError> {
        self.properties
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ContextError::PropertyNotFound { key: key.to_string() })
    }

    pub fn property_f64(&self, key: &str) -> Result<f64, ContextError> {
        match self.lookup(key)? {
            Property::Float(v) => Ok(*v),
            _ => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "float",
            }),
        }
    }

    pub fn property_i64(&self, key: &str) -> Result<i64, ContextError> {
        match self.lookup(key)? {
            Property::Int(v) => Ok(*v),
            _ => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "integer",
            }),
        }
    }

    pub fn property_text(&self, key: &str) -> Result<Arc<str>, ContextError> {
        match self.lookup(key)? {
            Property::Text(v) => Ok(Arc::clone(v)),
            _ => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "text",
            }),
        }
    }

    /// Typed access to an opaque blob; returns a shared handle.
    pub fn property_blob<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, ContextError> {
        match self.lookup(key)? {
            Property::Blob(v) => {
                Arc::clone(v)
                    .downcast::<T>()
                    .map_err(|_| ContextError::TypeMismatch {
                        key: key.to_string(),
                        expected: std::any::type_name::<T>(),
                    })
            }
            _ => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: "blob",
            }),
        }
    }

    fn lookup(&self, key: &str) -> Result<&Property, ContextError> {
        self.properties
            .get(key)
            .ok_or_else(|| ContextError::PropertyNotFound { key: key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::civil_day;

    fn ctx_with_prices(prices: &[(i64, f64)]) -> TradingContext {
        let mut ctx = TradingContext::new(1000.0);
        let series: BTreeMap<Timestamp, f64> = prices
            .iter()
            .map(|(offset, price)| {
                (
                    civil_day(2023, 1, 1).unwrap() + chrono::Duration::days(*offset),
                    *price,
                )
            })
            .collect();
        ctx.price_data.insert("SBER".into(), series);
        ctx
    }

    #[test]
    fn forward_fill_uses_latest_earlier_price() {
        let ctx = ctx_with_prices(&[(0, 100.0), (2, 104.0)]);
        let day1 = civil_day(2023, 1, 2).unwrap();
        assert_eq!(ctx.price_on("SBER", day1), None);
        assert_eq!(ctx.last_known_price("SBER", day1), Some(100.0));
    }

    #[test]
    fn delisting_means_past_the_last_observation() {
        let ctx = ctx_with_prices(&[(0, 100.0), (2, 104.0)]);
        assert!(!ctx.is_delisted("SBER", civil_day(2023, 1, 3).unwrap()));
        assert!(ctx.is_delisted("SBER", civil_day(2023, 1, 4).unwrap()));
        assert!(!ctx.is_delisted("GAZP", civil_day(2023, 1, 4).unwrap()));
    }

    #[test]
    fn portfolio_value_is_cash_plus_filled_holdings() {
        let mut ctx = ctx_with_prices(&[(0, 100.0), (2, 104.0)]);
        ctx.holdings.insert("SBER".into(), 5.0);
        ctx.current_date = Some(civil_day(2023, 1, 2).unwrap());
        // day 1 has no observation; forward fill to 100
        assert!((ctx.portfolio_value() - (1000.0 + 5.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn property_bag_is_type_safe() {
        let mut ctx = TradingContext::new(0.0);
        ctx.set_property("threshold", Property::Float(1.5));
        ctx.set_property("label", Property::Text(Arc::from("momentum")));

        assert_eq!(ctx.property_f64("threshold").unwrap(), 1.5);
        assert_eq!(&*ctx.property_text("label").unwrap(), "momentum");

        assert!(matches!(
            ctx.property_i64("threshold"),
            Err(ContextError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.property_f64("missing"),
            Err(ContextError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn blob_handles_survive_context_mutation() {
        let mut ctx = TradingContext::new(0.0);
        ctx.set_property("window", Property::Blob(Arc::new(vec![1.0f64, 2.0, 3.0])));

        let handle = ctx.property_blob::<Vec<f64>>("window").unwrap();
        ctx.remove_property("window").unwrap();
        assert_eq!(handle.len(), 3);

        // wrong type tag is reported, not panicked
        ctx.set_property("window", Property::Blob(Arc::new(7u32)));
        assert!(ctx.property_blob::<Vec<f64>>("window").is_err());
    }
}
