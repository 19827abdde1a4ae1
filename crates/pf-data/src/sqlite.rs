use std::path::Path;

use parking_lot::Mutex;
use pf_types::{AttributeValue, Error, Result, StoreError, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::store::{AttributeInfo, AttributeStore, InstrumentInfo};

/// SQLite-backed attribute store.
///
/// Normalized schema: `types`, `sources`, and `attribute_names` are lookup
/// tables; `attributes` rows reference them and carry a UNIQUE index over
/// `(instrument_pk, attribute_name_id, source_id, timestamp)`, which is the
/// uniqueness constraint the engine assumes. Timestamps persist as unix
/// seconds of the normalized day.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS types (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS sources (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS attribute_names (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS instruments (
    pk        INTEGER PRIMARY KEY,
    id        TEXT NOT NULL UNIQUE,
    name      TEXT NOT NULL,
    type_id   INTEGER NOT NULL REFERENCES types(id),
    source_id INTEGER NOT NULL REFERENCES sources(id)
);
CREATE TABLE IF NOT EXISTS attributes (
    id                INTEGER PRIMARY KEY,
    instrument_pk     INTEGER NOT NULL REFERENCES instruments(pk) ON DELETE CASCADE,
    attribute_name_id INTEGER NOT NULL REFERENCES attribute_names(id),
    source_id         INTEGER NOT NULL REFERENCES sources(id),
    timestamp         INTEGER NOT NULL,
    value_kind        INTEGER NOT NULL,
    float_value       REAL,
    int_value         INTEGER,
    text_value        TEXT,
    UNIQUE(instrument_pk, attribute_name_id, source_id, timestamp)
);
CREATE INDEX IF NOT EXISTS idx_instruments_type ON instruments(type_id);
CREATE INDEX IF NOT EXISTS idx_attributes_instrument ON attributes(instrument_pk);
CREATE INDEX IF NOT EXISTS idx_attributes_source ON attributes(source_id);
CREATE INDEX IF NOT EXISTS idx_attributes_name ON attributes(attribute_name_id);
CREATE INDEX IF NOT EXISTS idx_attributes_timestamp ON attributes(timestamp);
";

fn backend_err(err: rusqlite::Error) -> Error {
    StoreError::Backend(err.to_string()).into()
}

fn encode_value(value: &AttributeValue) -> (i64, Option<f64>, Option<i64>, Option<&str>) {
    match value {
        AttributeValue::Float(v) => (0, Some(*v), None, None),
        AttributeValue::Int(v) => (1, None, Some(*v), None),
        AttributeValue::Text(v) => (2, None, None, Some(v.as_str())),
    }
}

fn decode_value(
    kind: i64,
    float_value: Option<f64>,
    int_value: Option<i64>,
    text_value: Option<String>,
) -> AttributeValue {
    match kind {
        0 => AttributeValue::Float(float_value.unwrap_or(0.0)),
        1 => AttributeValue::Int(int_value.unwrap_or(0)),
        _ => AttributeValue::Text(text_value.unwrap_or_default()),
    }
}

fn decode_timestamp(secs: i64) -> Timestamp {
    chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(backend_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(backend_err)?;
        conn.execute_batch(SCHEMA).map_err(backend_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(backend_err)?;
        conn.execute_batch(SCHEMA).map_err(backend_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lookup_id(tx: &Transaction<'_>, table: &str, name: &str) -> Result<i64> {
        let insert = format!("INSERT OR IGNORE INTO {table} (name) VALUES (?1)");
        tx.execute(&insert, params![name]).map_err(backend_err)?;
        let select = format!("SELECT id FROM {table} WHERE name = ?1");
        tx.query_row(&select, params![name], |row| row.get(0))
            .map_err(backend_err)
    }

    fn instrument_pk(tx: &Transaction<'_>, id: &str) -> Result<i64> {
        tx.query_row(
            "SELECT pk FROM instruments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend_err)?
        .ok_or_else(|| StoreError::InstrumentNotFound { id: id.to_string() }.into())
    }
}

impl AttributeStore for SqliteStore {
    fn list_sources(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM sources ORDER BY name")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend_err)
    }

    fn save_instrument(&self, id: &str, name: &str, kind: &str, source: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend_err)?;
        let type_id = Self::lookup_id(&tx, "types", kind)?;
        let source_id = Self::lookup_id(&tx, "sources", source)?;
        tx.execute(
            "INSERT INTO instruments (id, name, type_id, source_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = ?2, type_id = ?3, source_id = ?4",
            params![id, name, type_id, source_id],
        )
        .map_err(backend_err)?;
        tx.commit().map_err(backend_err)
    }

    fn instrument_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT pk FROM instruments WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;
        Ok(found.is_some())
    }

    fn get_instrument(&self, id: &str) -> Result<InstrumentInfo> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT i.id, i.name, t.name, s.name
             FROM instruments i
             JOIN types t ON t.id = i.type_id
             JOIN sources s ON s.id = i.source_id
             WHERE i.id = ?1",
            params![id],
            |row| {
                Ok(InstrumentInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    source: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(backend_err)?
        .ok_or_else(|| StoreError::InstrumentNotFound { id: id.to_string() }.into())
    }

    fn list_instruments(
        &self,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT i.id FROM instruments i
                 JOIN types t ON t.id = i.type_id
                 JOIN sources s ON s.id = i.source_id
                 WHERE (?1 IS NULL OR t.name = ?1)
                   AND (?2 IS NULL OR s.name = ?2)
                 ORDER BY i.id",
            )
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![type_filter, source_filter], |row| {
                row.get::<_, String>(0)
            })
            .map_err(backend_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend_err)
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
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend_err)?;
        let pk = Self::instrument_pk(&tx, id)?;
        let attr_id = Self::lookup_id(&tx, "attribute_names", attribute)?;
        let source_id = Self::lookup_id(&tx, "sources", source)?;

        for (ts, value) in values {
            let (kind, float_value, int_value, text_value) = encode_value(value);
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO attributes
                     (instrument_pk, attribute_name_id, source_id, timestamp,
                      value_kind, float_value, int_value, text_value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        pk,
                        attr_id,
                        source_id,
                        ts.timestamp(),
                        kind,
                        float_value,
                        int_value,
                        text_value
                    ],
                )
                .map_err(backend_err)?;
            if inserted == 0 {
                // rolls the whole batch back on drop
                return Err(StoreError::DuplicateValue {
                    instrument: id.to_string(),
                    attribute: attribute.to_string(),
                    source_system: source.to_string(),
                    timestamp: ts.to_rfc3339(),
                }
                .into());
            }
        }
        tx.commit().map_err(backend_err)
    }

    fn get_attribute_history(
        &self,
        id: &str,
        attribute: &str,
        from: Timestamp,
        to: Timestamp,
        source: Option<&str>,
    ) -> Result<Vec<(Timestamp, AttributeValue)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT a.timestamp, a.value_kind, a.float_value, a.int_value, a.text_value
                 FROM attributes a
                 JOIN instruments i ON i.pk = a.instrument_pk
                 JOIN attribute_names n ON n.id = a.attribute_name_id
                 JOIN sources s ON s.id = a.source_id
                 WHERE i.id = ?1 AND n.name = ?2
                   AND a.timestamp BETWEEN ?3 AND ?4
                   AND (?5 IS NULL OR s.name = ?5)
                 ORDER BY a.timestamp ASC",
            )
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(
                params![id, attribute, from.timestamp(), to.timestamp(), source],
                |row| {
                    Ok((
                        decode_timestamp(row.get(0)?),
                        decode_value(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
                    ))
                },
            )
            .map_err(backend_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend_err)
    }

    fn list_instrument_attributes(&self, id: &str) -> Result<Vec<AttributeInfo>> {
        if !self.instrument_exists(id)? {
            return Err(StoreError::InstrumentNotFound { id: id.to_string() }.into());
        }
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT n.name, s.name, COUNT(*), MIN(a.timestamp), MAX(a.timestamp)
                 FROM attributes a
                 JOIN instruments i ON i.pk = a.instrument_pk
                 JOIN attribute_names n ON n.id = a.attribute_name_id
                 JOIN sources s ON s.id = a.source_id
                 WHERE i.id = ?1
                 GROUP BY n.name, s.name
                 ORDER BY n.name, s.name",
            )
            .map_err(backend_err)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(AttributeInfo {
                    name: row.get(0)?,
                    source: row.get(1)?,
                    value_count: row.get::<_, i64>(2)? as usize,
                    first_ts: decode_timestamp(row.get(3)?),
                    last_ts: decode_timestamp(row.get(4)?),
                })
            })
            .map_err(backend_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend_err)
    }

    fn get_attribute_value_count(
        &self,
        id: &str,
        attribute: &str,
        source: Option<&str>,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*)
                 FROM attributes a
                 JOIN instruments i ON i.pk = a.instrument_pk
                 JOIN attribute_names n ON n.id = a.attribute_name_id
                 JOIN sources s ON s.id = a.source_id
                 WHERE i.id = ?1 AND n.name = ?2 AND (?3 IS NULL OR s.name = ?3)",
                params![id, attribute, source],
                |row| row.get(0),
            )
            .map_err(backend_err)?;
        Ok(count as usize)
    }

    fn delete_instrument(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM instruments WHERE id = ?1", params![id])
            .map_err(backend_err)?;
        Ok(())
    }

    fn delete_instruments(
        &self,
        id_filter: Option<&str>,
        type_filter: Option<&str>,
        source_filter: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM instruments WHERE pk IN (
                 SELECT i.pk FROM instruments i
                 JOIN types t ON t.id = i.type_id
                 JOIN sources s ON s.id = i.source_id
                 WHERE (?1 IS NULL OR i.id = ?1)
                   AND (?2 IS NULL OR t.name = ?2)
                   AND (?3 IS NULL OR s.name = ?3)
             )",
            params![id_filter, type_filter, source_filter],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    fn delete_attributes(&self, id: &str, attribute: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM attributes WHERE instrument_pk IN (
                 SELECT pk FROM instruments WHERE id = ?1
             ) AND (?2 IS NULL OR attribute_name_id IN (
                 SELECT id FROM attribute_names WHERE name = ?2
             ))",
            params![id, attribute],
        )
        .map_err(backend_err)?;
        Ok(())
    }

    fn delete_source(&self, source: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM instruments WHERE source_id IN (
                 SELECT id FROM sources WHERE name = ?1
             )",
            params![source],
        )
        .map_err(backend_err)?;
        conn.execute(
            "DELETE FROM attributes WHERE source_id IN (
                 SELECT id FROM sources WHERE name = ?1
             )",
            params![source],
        )
        .map_err(backend_err)?;
        Ok(())
    }
}
