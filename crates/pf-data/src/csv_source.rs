use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime};
use pf_types::{AttributeValue, Result, StoreError, Timestamp};
use tracing::warn;

/// Series extracted from one file: attribute name -> time-ordered values.
pub type ExtractedSeries = BTreeMap<String, Vec<(Timestamp, AttributeValue)>>;

/// File-based data source reading attribute series out of delimited text.
///
/// Configured through a named option map:
///
/// | option            | default      | meaning |
/// |-------------------|--------------|---------|
/// | `csv-file`        | *(required)* | input path |
/// | `csv-delimiter`   | `,`          | field delimiter |
/// | `csv-skip-header` | `true`       | skip the first row |
/// | `csv-date-format` | `%Y-%m-%d`   | strftime-like date format |
/// | `csv-date-column` | `1`          | 1-based date column |
/// | `csv-map`         | *(required)* | `attr:column` pairs, 1-based, comma-separated |
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    path: PathBuf,
    delimiter: u8,
    skip_header: bool,
    date_format: String,
    date_column: usize,
    mappings: Vec<(String, usize)>,
}

fn option_err(option: &str, value: &str) -> pf_types::Error {
    StoreError::InvalidOption {
        option: option.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl CsvDataSource {
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self> {
        let path = options
            .get("csv-file")
            .ok_or(StoreError::MissingOption("csv-file".to_string()))?;

        let delimiter = match options.get("csv-delimiter") {
            None => b',',
            Some(d) if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
            Some(d) => return Err(option_err("csv-delimiter", d)),
        };

        let skip_header = match options.get("csv-skip-header").map(String::as_str) {
            None => true,
            Some("true") => true,
            Some("false") => false,
            Some(other) => return Err(option_err("csv-skip-header", other)),
        };

        let date_format = options
            .get("csv-date-format")
            .cloned()
            .unwrap_or_else(|| "%Y-%m-%d".to_string());

        let date_column = match options.get("csv-date-column") {
            None => 1,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|c| *c >= 1)
                .ok_or_else(|| option_err("csv-date-column", raw))?,
        };

        let map_spec = options
            .get("csv-map")
            .ok_or(StoreError::MissingOption("csv-map".to_string()))?;
        let mut mappings = Vec::new();
        for entry in map_spec.split(',').filter(|e| !e.trim().is_empty()) {
            let (attr, column) = entry
                .split_once(':')
                .ok_or_else(|| option_err("csv-map", entry))?;
            let column = column
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|c| *c >= 1)
                .ok_or_else(|| option_err("csv-map", entry))?;
            mappings.push((attr.trim().to_string(), column));
        }
        if mappings.is_empty() {
            return Err(option_err("csv-map", map_spec));
        }

        Ok(Self {
            path: PathBuf::from(path),
            delimiter,
            skip_header,
            date_format,
            date_column,
            mappings,
        })
    }

    /// Read the file and produce one series per mapped attribute.
    ///
    /// Rows whose date fails to parse are skipped with a warning. A mapped
    /// column missing from a row aborts extraction with the row number.
    pub fn extract(&self) -> Result<ExtractedSeries> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.skip_header)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut series: ExtractedSeries = self
            .mappings
            .iter()
            .map(|(attr, _)| (attr.clone(), Vec::new()))
            .collect();

        let header_offset = if self.skip_header { 1 } else { 0 };
        for (index, record) in reader.records().enumerate() {
            let row = index + 1 + header_offset;
            let record = record.map_err(|e| StoreError::Backend(e.to_string()))?;

            let raw_date = record.get(self.date_column - 1).ok_or(
                StoreError::ColumnOutOfRange {
                    row,
                    column: self.date_column,
                },
            )?;

            let Ok(date) = NaiveDate::parse_from_str(raw_date.trim(), &self.date_format) else {
                warn!(row, value = raw_date, "skipping row with unparsable date");
                continue;
            };
            let ts = date.and_time(NaiveTime::MIN).and_utc();

            for (attr, column) in &self.mappings {
                let raw = record
                    .get(column - 1)
                    .ok_or(StoreError::ColumnOutOfRange {
                        row,
                        column: *column,
                    })?;
                if let Some(values) = series.get_mut(attr) {
                    values.push((ts, AttributeValue::parse(raw)));
                }
            }
        }

        for values in series.values_mut() {
            values.sort_by_key(|(ts, _)| *ts);
        }
        Ok(series)
    }
}
