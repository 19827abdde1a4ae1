//! Trading calendar construction and date adjustment.
//!
//! The calendar is the set of days the reference instrument traded on,
//! falling back to the portfolio instrument with the widest coverage when
//! the reference has no data in the window. Alongside the day set it keeps
//! per-instrument coverage so buy/sell dates can be shifted onto days where
//! the instrument actually has data.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use pf_types::{normalize_to_day, CalendarError, Result, Timestamp};
use tracing::{debug, info, warn};

use pf_data::AttributeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Buy,
    Sell,
}

/// Record of one date shift, kept for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct DateAdjustment {
    pub instrument_id: String,
    pub requested: Timestamp,
    pub adjusted: Timestamp,
    pub operation: Operation,
    pub reason: String,
}

impl DateAdjustment {
    pub fn was_adjusted(&self) -> bool {
        self.requested != self.adjusted
    }
}

#[derive(Debug)]
pub struct TradingCalendar {
    trading_days: BTreeSet<Timestamp>,
    instrument_days: BTreeMap<String, BTreeSet<Timestamp>>,
    reference_instrument: String,
    used_alternative: bool,
    adjustments: Vec<DateAdjustment>,
}

impl TradingCalendar {
    /// Build the calendar from `close` coverage in `[start, end]`.
    ///
    /// The window is invalid only when neither the reference nor any
    /// portfolio instrument has a single observation.
    pub fn build(
        store: &dyn AttributeStore,
        instrument_ids: &[String],
        start: Timestamp,
        end: Timestamp,
        reference_instrument: &str,
    ) -> Result<Self> {
        let mut instrument_days: BTreeMap<String, BTreeSet<Timestamp>> = BTreeMap::new();
        for id in instrument_ids {
            instrument_days.insert(id.clone(), close_days(store, id, start, end)?);
        }

        let reference_days = if instrument_ids.iter().any(|id| id == reference_instrument) {
            instrument_days
                .get(reference_instrument)
                .cloned()
                .unwrap_or_default()
        } else {
            close_days(store, reference_instrument, start, end)?
        };

        let (trading_days, selected, used_alternative) = if !reference_days.is_empty() {
            (reference_days, reference_instrument.to_string(), false)
        } else {
            // Reference has nothing; fall back to the widest-covered
            // portfolio instrument, first declared winning ties.
            let mut best: Option<(&String, usize)> = None;
            for id in instrument_ids {
                let count = instrument_days.get(id).map_or(0, BTreeSet::len);
                if count > best.map_or(0, |(_, c)| c) {
                    best = Some((id, count));
                }
            }
            let Some((id, count)) = best else {
                return Err(CalendarError::Unavailable.into());
            };
            info!(
                reference = reference_instrument,
                alternative = %id,
                days = count,
                "reference instrument has no data, using alternative"
            );
            (
                instrument_days.get(id).cloned().unwrap_or_default(),
                id.clone(),
                true,
            )
        };

        if trading_days.is_empty() {
            return Err(CalendarError::Unavailable.into());
        }

        debug!(
            reference = %selected,
            days = trading_days.len(),
            "trading calendar ready"
        );

        Ok(Self {
            trading_days,
            instrument_days,
            reference_instrument: selected,
            used_alternative,
            adjustments: Vec::new(),
        })
    }

    pub fn reference_instrument(&self) -> &str {
        &self.reference_instrument
    }

    pub fn used_alternative(&self) -> bool {
        self.used_alternative
    }

    pub fn trading_day_count(&self) -> usize {
        self.trading_days.len()
    }

    /// Trading days in ascending order.
    pub fn sorted_days(&self) -> Vec<Timestamp> {
        self.trading_days.iter().copied().collect()
    }

    pub fn is_trading_day(&self, date: Timestamp) -> bool {
        self.trading_days.contains(&normalize_to_day(date))
    }

    pub fn next_trading_day(&self, date: Timestamp) -> Option<Timestamp> {
        self.trading_days
            .range((Bound::Excluded(normalize_to_day(date)), Bound::Unbounded))
            .next()
            .copied()
    }

    pub fn previous_trading_day(&self, date: Timestamp) -> Option<Timestamp> {
        self.trading_days
            .range(..normalize_to_day(date))
            .next_back()
            .copied()
    }

    pub fn has_data(&self, instrument_id: &str, date: Timestamp) -> bool {
        self.instrument_days
            .get(instrument_id)
            .map_or(false, |days| days.contains(&normalize_to_day(date)))
    }

    /// Move `requested` onto a day where `operation` can actually execute.
    ///
    /// Non-trading days seek forward to the next trading day. Days without
    /// instrument data seek forward for buys; sells seek forward first and
    /// fall back to the last earlier day with data, which usually means the
    /// instrument is gone from the exchange.
    pub fn adjust_date_for_operation(
        &mut self,
        instrument_id: &str,
        requested: Timestamp,
        operation: Operation,
    ) -> Result<DateAdjustment> {
        let requested = normalize_to_day(requested);
        let mut adjustment = DateAdjustment {
            instrument_id: instrument_id.to_string(),
            requested,
            adjusted: requested,
            operation,
            reason: String::new(),
        };

        if !self.is_trading_day(requested) {
            adjustment.adjusted = self
                .next_trading_day(requested)
                .ok_or(CalendarError::NoFutureTradingDay)?;
            adjustment.reason = "requested date is not a trading day".to_string();
        }

        if !self.has_data(instrument_id, adjustment.adjusted) {
            match operation {
                Operation::Buy => {
                    adjustment.adjusted = self
                        .next_data_day(instrument_id, adjustment.adjusted)
                        .ok_or_else(|| CalendarError::NoFutureData {
                            id: instrument_id.to_string(),
                        })?;
                    adjustment.reason = "forward transfer: no data on requested date".to_string();
                }
                Operation::Sell => {
                    if let Some(next) = self.next_data_day(instrument_id, adjustment.adjusted) {
                        adjustment.adjusted = next;
                        adjustment.reason =
                            "forward transfer: no data on requested date".to_string();
                    } else {
                        adjustment.adjusted = self
                            .previous_data_day(instrument_id, adjustment.adjusted)
                            .ok_or_else(|| CalendarError::NoDataAtAll {
                                id: instrument_id.to_string(),
                            })?;
                        adjustment.reason =
                            "backward transfer: no future data (possible delisting)".to_string();
                    }
                }
            }
        }

        if adjustment.was_adjusted() {
            warn!(
                instrument = instrument_id,
                requested = %adjustment.requested.date_naive(),
                adjusted = %adjustment.adjusted.date_naive(),
                reason = %adjustment.reason,
                "date adjusted for operation"
            );
            self.adjustments.push(adjustment.clone());
        }

        Ok(adjustment)
    }

    pub fn adjustment_log(&self) -> &[DateAdjustment] {
        &self.adjustments
    }

    fn next_data_day(&self, instrument_id: &str, from: Timestamp) -> Option<Timestamp> {
        // from itself has no data, so the scan starts at the trading day
        // at-or-after it and walks forward.
        let mut cursor = Some(from);
        while let Some(day) = cursor {
            if self.has_data(instrument_id, day) {
                return Some(day);
            }
            cursor = self.next_trading_day(day);
        }
        None
    }

    fn previous_data_day(&self, instrument_id: &str, from: Timestamp) -> Option<Timestamp> {
        let mut cursor = self.previous_trading_day(from);
        while let Some(day) = cursor {
            if self.has_data(instrument_id, day) {
                return Some(day);
            }
            cursor = self.previous_trading_day(day);
        }
        None
    }
}

fn close_days(
    store: &dyn AttributeStore,
    instrument_id: &str,
    start: Timestamp,
    end: Timestamp,
) -> Result<BTreeSet<Timestamp>> {
    let history = store.get_attribute_history(instrument_id, "close", start, end, None)?;
    Ok(history
        .into_iter()
        .filter(|(_, value)| value.as_f64().is_some())
        .map(|(ts, _)| normalize_to_day(ts))
        .collect())
}
