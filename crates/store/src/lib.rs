//! SQLite-backed [`ImportStore`].
//!
//! One database file holds the canonical snapshot and the target collection.
//! Cell maps are stored as JSON text so the schema does not depend on the
//! import profile. Each cell is tagged with its kind, so text that looks
//! like a date or a number reads back as text.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use fleetsync_import::model::MatchOutcome;
use fleetsync_import::{CanonicalEntity, CellValue, ImportStore, ReconciledRow, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS canonical (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}'   -- JSON object of cells
);

CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    id TEXT NOT NULL UNIQUE,
    foreign_key TEXT,                       -- NULL when unmatched
    outcome TEXT NOT NULL,                  -- matched | ambiguous_fallback | unmatched
    fields TEXT NOT NULL                    -- JSON object of cells
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const SCHEMA_VERSION: &str = "2";

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// On-disk form of a cell: `{"t": "text", "v": "2024-03-01"}`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum StoredCell {
    Empty,
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl From<&CellValue> for StoredCell {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Empty => Self::Empty,
            CellValue::Integer(n) => Self::Integer(*n),
            CellValue::Number(n) => Self::Number(*n),
            CellValue::Date(d) => Self::Date(*d),
            CellValue::Text(s) => Self::Text(s.clone()),
        }
    }
}

impl From<StoredCell> for CellValue {
    fn from(cell: StoredCell) -> Self {
        match cell {
            StoredCell::Empty => Self::Empty,
            StoredCell::Integer(n) => Self::Integer(n),
            StoredCell::Number(n) => Self::Number(n),
            StoredCell::Date(d) => Self::Date(d),
            StoredCell::Text(s) => Self::Text(s),
        }
    }
}

fn encode_cells(cells: &BTreeMap<String, CellValue>) -> Result<String, StoreError> {
    let stored: BTreeMap<&str, StoredCell> =
        cells.iter().map(|(k, v)| (k.as_str(), StoredCell::from(v))).collect();
    serde_json::to_string(&stored).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_cells(json: &str) -> Result<BTreeMap<String, CellValue>, StoreError> {
    let stored: BTreeMap<String, StoredCell> =
        serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(stored.into_iter().map(|(k, v)| (k, CellValue::from(v))).collect())
}

fn schema_version(conn: &Connection) -> Result<Option<String>, StoreError> {
    conn.query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .map_err(backend)
}

fn unsupported_version(found: &str) -> StoreError {
    StoreError::Backend(format!(
        "unsupported schema version {found} (expected {SCHEMA_VERSION})"
    ))
}

fn decode_outcome(text: &str) -> Result<MatchOutcome, StoreError> {
    match text {
        "matched" => Ok(MatchOutcome::Matched),
        "ambiguous_fallback" => Ok(MatchOutcome::AmbiguousFallback),
        "unmatched" => Ok(MatchOutcome::Unmatched),
        other => Err(StoreError::Serialization(format!("unknown outcome '{other}'"))),
    }
}

pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open (or create) a store file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn)
    }

    /// Open an existing store without creating or migrating anything.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(backend)?;
        match schema_version(&conn)? {
            Some(v) if v == SCHEMA_VERSION => Ok(Self { conn, in_transaction: false }),
            Some(other) => Err(unsupported_version(&other)),
            None => Err(StoreError::Backend(format!(
                "{} has no schema version",
                path.display()
            ))),
        }
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;

        match schema_version(&conn)?.as_deref() {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )
                .map_err(backend)?;
            }
            Some(SCHEMA_VERSION) => {}
            Some(other) => return Err(unsupported_version(other)),
        }

        Ok(Self { conn, in_transaction: false })
    }

    /// Replace the canonical snapshot. Returns the number of entities written.
    pub fn replace_canonical(&mut self, entities: &[CanonicalEntity]) -> Result<usize, StoreError> {
        let tx = self.conn.savepoint().map_err(backend)?;
        tx.execute("DELETE FROM canonical", []).map_err(backend)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO canonical (id, name, attributes) VALUES (?1, ?2, ?3)")
                .map_err(backend)?;
            for entity in entities {
                stmt.execute(params![entity.id, entity.name, encode_cells(&entity.attributes)?])
                    .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        log::debug!("canonical snapshot replaced: {} entities", entities.len());
        Ok(entities.len())
    }

    /// Stored records in insertion order.
    ///
    /// Warnings are not persisted; decoded rows carry none.
    pub fn records(&self) -> Result<Vec<ReconciledRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, foreign_key, outcome, fields FROM records ORDER BY seq")
            .map_err(backend)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?;

        let mut out = Vec::new();
        for item in raw {
            let (id, foreign_key, outcome, fields) = item.map_err(backend)?;
            out.push(ReconciledRow {
                id,
                foreign_key,
                fields: decode_cells(&fields)?,
                outcome: decode_outcome(&outcome)?,
                warnings: Vec::new(),
            });
        }
        Ok(out)
    }

    pub fn record_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(backend)?;
        Ok(n as usize)
    }
}

impl ImportStore for SqliteStore {
    fn load_canonical(&self) -> Result<Vec<CanonicalEntity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, attributes FROM canonical ORDER BY rowid")
            .map_err(backend)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(backend)?;

        let mut out = Vec::new();
        for item in raw {
            let (id, name, attributes) = item.map_err(backend)?;
            out.push(CanonicalEntity { id, name, attributes: decode_cells(&attributes)? });
        }
        Ok(out)
    }

    fn delete_all(&mut self) -> Result<usize, StoreError> {
        let deleted = self.conn.execute("DELETE FROM records", []).map_err(backend)?;
        log::debug!("deleted {deleted} record(s)");
        Ok(deleted)
    }

    /// Each batch is all-or-nothing, inside or outside an open transaction.
    fn insert_batch(&mut self, rows: &[ReconciledRow]) -> Result<(), StoreError> {
        let sp = self.conn.savepoint().map_err(backend)?;
        {
            let mut stmt = sp
                .prepare(
                    "INSERT INTO records (id, foreign_key, outcome, fields) VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(backend)?;
            for row in rows {
                stmt.execute(params![
                    row.id,
                    row.foreign_key,
                    row.outcome.to_string(),
                    encode_cells(&row.fields)?,
                ])
                .map_err(backend)?;
            }
        }
        sp.commit().map_err(backend)?;
        log::debug!("inserted batch of {} record(s)", rows.len());
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::Backend("transaction already open".into()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(backend)?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Backend("no open transaction".into()));
        }
        self.conn.execute_batch("COMMIT").map_err(backend)?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::Backend("no open transaction".into()));
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK").map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, outcome: MatchOutcome) -> ReconciledRow {
        ReconciledRow {
            id: id.into(),
            foreign_key: (outcome != MatchOutcome::Unmatched).then(|| "a1".to_string()),
            fields: BTreeMap::from([
                ("brand".to_string(), CellValue::from("Fiat")),
                ("limit".to_string(), CellValue::Number(1500.5)),
                ("card".to_string(), CellValue::Integer(7001)),
                ("note".to_string(), CellValue::Empty),
                ("ref".to_string(), CellValue::from("2024-03-01")),
                ("code".to_string(), CellValue::from("0042")),
                ("due".to_string(), CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
            ]),
            outcome,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_canonical().unwrap().is_empty());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn records_keep_insertion_order_and_cells() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let rows = vec![
            row("z", MatchOutcome::Matched),
            row("a", MatchOutcome::Unmatched),
            row("m", MatchOutcome::AmbiguousFallback),
        ];
        store.insert_batch(&rows).unwrap();
        assert_eq!(store.records().unwrap(), rows);
    }

    #[test]
    fn failed_batch_leaves_no_partial_rows() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_batch(&[row("a", MatchOutcome::Matched)]).unwrap();
        let dup = [row("b", MatchOutcome::Matched), row("a", MatchOutcome::Matched)];
        assert!(matches!(store.insert_batch(&dup), Err(StoreError::Backend(_))));
        let ids: Vec<String> = store.records().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn rollback_restores_deleted_records() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_batch(&[row("old", MatchOutcome::Matched)]).unwrap();

        store.begin().unwrap();
        assert_eq!(store.delete_all().unwrap(), 1);
        store.insert_batch(&[row("new", MatchOutcome::Matched)]).unwrap();
        store.rollback().unwrap();

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "old");
        assert!(store.rollback().is_err());
    }

    #[test]
    fn canonical_replace_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .replace_canonical(&[CanonicalEntity::new("old", "Gone")])
            .unwrap();
        let set = vec![
            CanonicalEntity::new("a2", "Mario Rossi").with("plate", "EF456GH"),
            CanonicalEntity::new("a1", "Mario Rossi").with("plate", "AB123CD"),
        ];
        assert_eq!(store.replace_canonical(&set).unwrap(), 2);
        assert_eq!(store.load_canonical().unwrap(), set);
    }

    #[test]
    fn cells_are_tagged_on_disk() {
        let cells = BTreeMap::from([("ref".to_string(), CellValue::from("2024-03-01"))]);
        let json = encode_cells(&cells).unwrap();
        assert_eq!(json, r#"{"ref":{"t":"text","v":"2024-03-01"}}"#);
        assert_eq!(decode_cells(&json).unwrap(), cells);
    }

    #[test]
    fn read_only_open_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        assert!(matches!(SqliteStore::open_read_only(&path), Err(StoreError::Backend(_))));
        assert!(!path.exists());
    }

    #[test]
    fn read_only_open_loads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        SqliteStore::open(&path)
            .unwrap()
            .replace_canonical(&[CanonicalEntity::new("a1", "Mario Rossi")])
            .unwrap();

        let store = SqliteStore::open_read_only(&path).unwrap();
        assert_eq!(store.load_canonical().unwrap().len(), 1);
    }

    #[test]
    fn unknown_outcome_is_serialization_error() {
        assert!(matches!(decode_outcome("maybe"), Err(StoreError::Serialization(_))));
    }
}
