use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};

/// Instant on the UTC civil calendar. The engine always normalizes these to
/// the start of a day before using them as map keys or comparing them.
pub type Timestamp = DateTime<Utc>;

/// Normalize a timestamp to midnight UTC of the same civil day.
pub fn normalize_to_day(ts: Timestamp) -> Timestamp {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Midnight UTC for a civil date; the canonical way fixtures and the CLI
/// construct day values.
pub fn civil_day(year: i32, month: u32, day: u32) -> Option<Timestamp> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

/// Parse a `YYYY-MM-DD` date into a normalized timestamp.
pub fn parse_civil_day(text: &str) -> Option<Timestamp> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc())
}

/// Calendar year of a timestamp.
pub fn year_of(ts: Timestamp) -> i32 {
    ts.year()
}

/// `YYYY-MM` bin key used by the monthly inflation series.
pub fn month_key(ts: Timestamp) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn normalization_drops_time_of_day() {
        let ts = Utc.with_ymd_and_hms(2023, 5, 17, 15, 42, 9).unwrap();
        let day = normalize_to_day(ts);
        assert_eq!(day.hour(), 0);
        assert_eq!(day.minute(), 0);
        assert_eq!(day.date_naive(), ts.date_naive());
    }

    #[test]
    fn normalization_is_idempotent() {
        let day = civil_day(2023, 5, 17).unwrap();
        assert_eq!(normalize_to_day(day), day);
    }

    #[test]
    fn month_key_pads_single_digit_months() {
        assert_eq!(month_key(civil_day(2023, 5, 17).unwrap()), "2023-05");
        assert_eq!(month_key(civil_day(2023, 11, 1).unwrap()), "2023-11");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_civil_day("2023-05-17").is_some());
        assert!(parse_civil_day("17.05.2023").is_none());
        assert!(parse_civil_day("not a date").is_none());
    }
}
