use pf_types::{AttributeValue, Result, Timestamp};

/// Instrument metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub source: String,
}

/// Per-attribute coverage summary for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub source: String,
    pub value_count: usize,
    pub first_ts: Timestamp,
    pub last_ts: Timestamp,
}

/// The persistent key/attribute/source/timestamp table the engine reads.
///
/// `(instrument, attribute, source, ts)` is unique; batch writes that would
/// violate it fail without partial effect. `get_attribute_history` returns
/// values sorted ascending by timestamp, with inclusive bounds on normalized
/// dates. The store is read-only during a back-test and may be shared across
/// runs.
pub trait AttributeStore: Send + Sync {
    fn list_sources(&self) -> Result<Vec<String>>;

    fn save_instrument(&self, id: &str, name: &str, kind: &str, source: &str) -> Result<()>;

    fn instrument_exists(&self, id: &str) -> Result<bool>;

    fn get_instrument(&self, id: &str) -> Result<InstrumentInfo>;

    fn list_instruments(
        &self,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<Vec<String>>;

    fn save_attribute(
        &self,
        id: &str,
        attribute: &str,
        source: &str,
        ts: Timestamp,
        value: AttributeValue,
    ) -> Result<()>;

    fn save_attributes(
        &self,
        id: &str,
        attribute: &str,
        source: &str,
        values: &[(Timestamp, AttributeValue)],
    ) -> Result<()>;

    fn get_attribute_history(
        &self,
        id: &str,
        attribute: &str,
        from: Timestamp,
        to: Timestamp,
        source: Option<&str>,
    ) -> Result<Vec<(Timestamp, AttributeValue)>>;

    fn list_instrument_attributes(&self, id: &str) -> Result<Vec<AttributeInfo>>;

    fn get_attribute_value_count(
        &self,
        id: &str,
        attribute: &str,
        source: Option<&str>,
    ) -> Result<usize>;

    fn delete_instrument(&self, id: &str) -> Result<()>;

    fn delete_instruments(
        &self,
        id_filter: Option<&str>,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<()>;

    fn delete_attributes(&self, id: &str, attribute: Option<&str>) -> Result<()>;

    fn delete_source(&self, source: &str) -> Result<()>;
}
