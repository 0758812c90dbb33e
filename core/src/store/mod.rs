//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! Services call store methods; they never execute SQL directly.
//!
//! Multi-statement writes go through `write_transaction`, which opens a
//! `BEGIN IMMEDIATE` transaction: SQLite admits one writer at a time, so
//! read-modify-write cycles on a store's balances cannot interleave.

use crate::{
    error::{PayoutError, PayoutResult},
    event::{EventLogEntry, LedgerEvent},
    types::Timestamp,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

mod earnings;
mod payout;
mod settings;
mod transaction;

pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// File-backed ledger. Several processes may open the same file; the
    /// busy timeout makes a second writer wait for `BEGIN IMMEDIATE`.
    pub fn open(path: &str) -> PayoutResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // journal_mode returns a row, so it cannot go through execute_batch.
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!("ledger {path} opened, journal mode {mode}");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Private in-memory ledger, gone when dropped.
    pub fn in_memory() -> PayoutResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order. Safe to call on every start.
    pub fn migrate(&self) -> PayoutResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    /// Run `f` inside an immediate write transaction, committing on `Ok` and
    /// rolling back on `Err`. Nested calls run under a savepoint: an `Err`
    /// undoes only the nested work, and the outermost call commits.
    pub fn write_transaction<T>(&self, f: impl FnOnce() -> PayoutResult<T>) -> PayoutResult<T> {
        if !self.conn.is_autocommit() {
            return self.savepoint(f);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f().and_then(|value| {
            self.conn.execute_batch("COMMIT")?;
            Ok(value)
        });
        if result.is_err() && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::error!("rollback failed: {e}");
            }
        }
        result
    }

    fn savepoint<T>(&self, f: impl FnOnce() -> PayoutResult<T>) -> PayoutResult<T> {
        self.conn.execute_batch("SAVEPOINT nested_write")?;
        match f() {
            Ok(value) => {
                self.conn.execute_batch("RELEASE nested_write")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self
                    .conn
                    .execute_batch("ROLLBACK TO nested_write; RELEASE nested_write")
                {
                    log::error!("savepoint rollback failed: {rb}");
                }
                Err(e)
            }
        }
    }

    /// Run `f` against the ledger and throw every write away afterwards.
    /// Holds the write lock for the duration, like a real run would.
    pub fn rolled_back<T>(&self, f: impl FnOnce() -> PayoutResult<T>) -> PayoutResult<T> {
        if !self.conn.is_autocommit() {
            return Err(PayoutError::Other(anyhow::anyhow!(
                "a rolled-back run cannot start inside an open transaction"
            )));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f();
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        result
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &LedgerEvent, at: Timestamp) -> PayoutResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (event_type, entity_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.event_type(),
                event.entity_id(),
                serde_json::to_string(event)?,
                millis(at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_entity(&self, entity_id: &str) -> PayoutResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, entity_id, payload, created_at
             FROM event_log WHERE entity_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![entity_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    event_type: row.get(1)?,
                    entity_id:  row.get(2)?,
                    payload:    row.get(3)?,
                    created_at: timestamp_col(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> PayoutResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ── Column codecs ──────────────────────────────────────────────

pub(crate) fn millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

pub(crate) fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn opt_timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, Type::Text, e))
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, Type::Text, e)),
        None => Ok(None),
    }
}
