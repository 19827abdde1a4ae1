//! Dividend collection over the trading calendar.
//!
//! Payments are indexed per instrument as an ex-date-sorted vector. The
//! driver sweeps a `(previous, current]` window each day; a per-instrument
//! cursor only ever moves forward, so each ex-date pays at most once even
//! when weekends or data gaps make the window span several civil days.

use std::collections::BTreeMap;

use pf_types::{DividendPayment, Timestamp};

#[derive(Debug, Default)]
pub struct DividendCollector {
    cursors: BTreeMap<String, usize>,
}

impl DividendCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payments with `previous < ex_date <= current` for one instrument.
    ///
    /// Ex-dates at or before `previous` are skipped permanently; the cursor
    /// never rewinds. An empty window (day zero, where `previous ==
    /// current`) pays nothing.
    pub fn collect(
        &mut self,
        instrument_id: &str,
        payments: &[DividendPayment],
        previous: Timestamp,
        current: Timestamp,
    ) -> Vec<DividendPayment> {
        let cursor = self.cursors.entry(instrument_id.to_string()).or_insert(0);

        while *cursor < payments.len() && payments[*cursor].ex_date <= previous {
            *cursor += 1;
        }

        let mut due = Vec::new();
        while *cursor < payments.len() && payments[*cursor].ex_date <= current {
            due.push(payments[*cursor].clone());
            *cursor += 1;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_types::civil_day;

    fn day(offset: i64) -> Timestamp {
        civil_day(2023, 3, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn payment(offset: i64, per_share: f64) -> DividendPayment {
        DividendPayment {
            ex_date: day(offset),
            per_share,
        }
    }

    #[test]
    fn window_is_half_open() {
        let mut collector = DividendCollector::new();
        let payments = vec![payment(1, 5.0), payment(3, 7.0)];

        // (day0, day1] catches the first payment only
        let due = collector.collect("SBER", &payments, day(0), day(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].per_share, 5.0);
    }

    #[test]
    fn day_zero_empty_window_pays_nothing() {
        let mut collector = DividendCollector::new();
        let payments = vec![payment(0, 5.0)];
        assert!(collector.collect("SBER", &payments, day(0), day(0)).is_empty());
    }

    #[test]
    fn skipped_days_still_pay_each_ex_date_once() {
        let mut collector = DividendCollector::new();
        let payments = vec![payment(1, 5.0), payment(2, 6.0), payment(5, 7.0)];

        // a three-day gap (weekend + holiday) covers two ex-dates at once
        let due = collector.collect("SBER", &payments, day(0), day(3));
        assert_eq!(due.len(), 2);

        // replaying a window that overlaps already-paid dates yields nothing
        let due = collector.collect("SBER", &payments, day(0), day(3));
        assert!(due.is_empty());

        let due = collector.collect("SBER", &payments, day(3), day(6));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].per_share, 7.0);
    }

    #[test]
    fn old_ex_dates_before_first_holding_are_skipped() {
        let mut collector = DividendCollector::new();
        let payments = vec![payment(1, 5.0), payment(8, 7.0)];

        // instrument was not held until day 7; the day-1 ex-date must not
        // leak into the first collected window
        let due = collector.collect("SBER", &payments, day(7), day(9));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].per_share, 7.0);
    }

    #[test]
    fn cursors_are_independent_per_instrument() {
        let mut collector = DividendCollector::new();
        let sber = vec![payment(1, 5.0)];
        let gazp = vec![payment(1, 9.0)];

        assert_eq!(collector.collect("SBER", &sber, day(0), day(2)).len(), 1);
        assert_eq!(collector.collect("GAZP", &gazp, day(0), day(2)).len(), 1);
    }
}
