use std::collections::BTreeMap;

use parking_lot::RwLock;
use pf_types::{AttributeValue, Result, StoreError, Timestamp};

use crate::store::{AttributeInfo, AttributeStore, InstrumentInfo};

/// Key of one attribute series: (instrument, attribute, source).
type SeriesKey = (String, String, String);

#[derive(Default)]
struct Inner {
    instruments: BTreeMap<String, InstrumentInfo>,
    series: BTreeMap<SeriesKey, BTreeMap<Timestamp, AttributeValue>>,
}

/// In-memory attribute store. The engine's test fixture and a usable
/// scratch backend for one-shot runs.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn require_instrument(&self, id: &str) -> Result<()> {
        if self.instruments.contains_key(id) {
            Ok(())
        } else {
            Err(StoreError::InstrumentNotFound { id: id.to_string() }.into())
        }
    }

    fn remove_instrument(&mut self, id: &str) {
        self.instruments.remove(id);
        self.series.retain(|(inst, _, _), _| inst != id);
    }
}

impl AttributeStore for InMemoryStore {
    fn list_sources(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut sources: Vec<String> = inner
            .instruments
            .values()
            .map(|i| i.source.clone())
            .chain(inner.series.keys().map(|(_, _, source)| source.clone()))
            .collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    fn save_instrument(&self, id: &str, name: &str, kind: &str, source: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.instruments.insert(
            id.to_string(),
            InstrumentInfo {
                id: id.to_string(),
                name: name.to_string(),
                kind: kind.to_string(),
                source: source.to_string(),
            },
        );
        Ok(())
    }

    fn instrument_exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().instruments.contains_key(id))
    }

    fn get_instrument(&self, id: &str) -> Result<InstrumentInfo> {
        self.inner
            .read()
            .instruments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::InstrumentNotFound { id: id.to_string() }.into())
    }

    fn list_instruments(
        &self,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .instruments
            .values()
            .filter(|info| type_filter.map_or(true, |t| info.kind == t))
            .filter(|info| source_filter.map_or(true, |s| info.source == s))
            .map(|info| info.id.clone())
            .collect())
    }

    fn save_attribute(
        &self,
        id: &str,
        attribute: &str,
        source: &str,
        ts: Timestamp,
        value: AttributeValue,
    ) -> Result<()> {
        self.save_attributes(id, attribute, source, &[(ts, value)])
    }

    fn save_attributes(
        &self,
        id: &str,
        attribute: &str,
        source: &str,
        values: &[(Timestamp, AttributeValue)],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.require_instrument(id)?;

        let key = (id.to_string(), attribute.to_string(), source.to_string());

        // Validate the whole batch before touching the series so a conflict
        // leaves no partial effect.
        let existing = inner.series.get(&key);
        let mut batch: BTreeMap<Timestamp, &AttributeValue> = BTreeMap::new();
        for (ts, value) in values {
            let duplicate = batch.insert(*ts, value).is_some()
                || existing.is_some_and(|s| s.contains_key(ts));
            if duplicate {
                return Err(StoreError::DuplicateValue {
                    instrument: id.to_string(),
                    attribute: attribute.to_string(),
                    source_system: source.to_string(),
                    timestamp: ts.to_rfc3339(),
                }
                .into());
            }
        }

        let series = inner.series.entry(key).or_default();
        for (ts, value) in values {
            series.insert(*ts, value.clone());
        }
        Ok(())
    }

    fn get_attribute_history(
        &self,
        id: &str,
        attribute: &str,
        from: Timestamp,
        to: Timestamp,
        source: Option<&str>,
    ) -> Result<Vec<(Timestamp, AttributeValue)>> {
        let inner = self.inner.read();
        let mut rows: Vec<(Timestamp, AttributeValue)> = Vec::new();
        for ((inst, attr, src), series) in &inner.series {
            if inst != id || attr != attribute {
                continue;
            }
            if source.is_some_and(|s| s != src) {
                continue;
            }
            for (ts, value) in series.range(from..=to) {
                rows.push((*ts, value.clone()));
            }
        }
        rows.sort_by_key(|(ts, _)| *ts);
        Ok(rows)
    }

    fn list_instrument_attributes(&self, id: &str) -> Result<Vec<AttributeInfo>> {
        let inner = self.inner.read();
        inner.require_instrument(id)?;

        let mut infos = Vec::new();
        for ((inst, attr, src), series) in &inner.series {
            if inst != id {
                continue;
            }
            if let (Some((first_ts, _)), Some((last_ts, _))) =
                (series.iter().next(), series.iter().next_back())
            {
                infos.push(AttributeInfo {
                    name: attr.clone(),
                    source: src.clone(),
                    value_count: series.len(),
                    first_ts: *first_ts,
                    last_ts: *last_ts,
                });
            }
        }
        Ok(infos)
    }

    fn get_attribute_value_count(
        &self,
        id: &str,
        attribute: &str,
        source: Option<&str>,
    ) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner
            .series
            .iter()
            .filter(|((inst, attr, src), _)| {
                inst == id && attr == attribute && source.map_or(true, |s| s == src)
            })
            .map(|(_, series)| series.len())
            .sum())
    }

    fn delete_instrument(&self, id: &str) -> Result<()> {
        self.inner.write().remove_instrument(id);
        Ok(())
    }

    fn delete_instruments(
        &self,
        id_filter: Option<&str>,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .instruments
            .values()
            .filter(|info| id_filter.map_or(true, |f| info.id == f))
            .filter(|info| type_filter.map_or(true, |f| info.kind == f))
            .filter(|info| source_filter.map_or(true, |f| info.source == f))
            .map(|info| info.id.clone())
            .collect();
        for id in doomed {
            inner.remove_instrument(&id);
        }
        Ok(())
    }

    fn delete_attributes(&self, id: &str, attribute: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .series
            .retain(|(inst, attr, _), _| inst != id || attribute.map_or(false, |a| a != attr));
        Ok(())
    }

    fn delete_source(&self, source: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .instruments
            .values()
            .filter(|info| info.source == source)
            .map(|info| info.id.clone())
            .collect();
        for id in doomed {
            inner.remove_instrument(&id);
        }
        inner.series.retain(|(_, _, src), _| src != source);
        Ok(())
    }
}
