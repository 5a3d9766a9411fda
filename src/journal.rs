//! # Journal Store
//!
//! The append-only log of signed quantity deltas, one row per adjustment.
//!
//! ```text
//!   writers ──append──►  ┌────┬──────────┬─────┬──────┐
//!   (never locked)       │ id │ key      │ Δoh │ Δall │
//!                        ├────┼──────────┼─────┼──────┤
//!                        │ 41 │ SKU1@10  │  -3 │    0 │ ◄─┐ snapshot_ids(key)
//!                        │ 42 │ SKU1@10  │  -5 │    0 │ ◄─┤ sum(ids)
//!                        │ 43 │ SKU9@10  │ +12 │    0 │   │ delete_all(ids)
//!                        │ 44 │ SKU1@10  │  +2 │    0 │ ◄─┘ (compactor only)
//!                        └────┴──────────┴─────┴──────┘
//! ```
//!
//! Every read-and-delete operation is scoped to an explicit id list, never
//! to "all rows for key": rows appended after a snapshot must survive the
//! compaction pass that took it.

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{current_time_ms, InventoryKey, JournalEntry, JournalId, Rollup};

// =============================================================================
// Limits
// =============================================================================

/// Upper bound on bound parameters per statement.
///
/// Well below SQLite's `SQLITE_MAX_VARIABLE_NUMBER`; id lists and key lists
/// longer than this are split across statements.
pub const MAX_IDS_PER_STATEMENT: usize = 500;

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values(ids: &[JournalId]) -> impl Iterator<Item = i64> + '_ {
    ids.iter().map(JournalId::as_raw)
}

/// SQLite's `SUM()` fails with "integer overflow" instead of wrapping.
pub(crate) fn sum_error(err: rusqlite::Error, subject: impl FnOnce() -> String) -> Error {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        if message.contains("integer overflow") {
            return Error::QuantityOverflow(subject());
        }
    }
    Error::Storage(err)
}

// =============================================================================
// Repository Trait
// =============================================================================

/// Capability interface over the journal table.
///
/// Every method takes the caller's connection, so the caller decides the
/// transaction each call joins.
pub trait JournalRepository {
    /// Inserts one delta row. Never consults a compaction lock.
    fn append(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        quantity_on_hand_delta: i64,
        allocated_quantity_delta: i64,
    ) -> Result<JournalEntry>;

    /// Ids of the rows for `key` that exist right now, ascending.
    ///
    /// With `limit`, only the oldest `limit` ids are returned.
    fn snapshot_ids(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        limit: Option<usize>,
    ) -> Result<Vec<JournalId>>;

    /// Sums exactly the given rows. Ids that no longer exist contribute nothing.
    ///
    /// Callers pass at most [`MAX_IDS_PER_STATEMENT`] ids; the
    /// [`RollupCalculator`](crate::rollup::RollupCalculator) does the chunking.
    fn sum(&self, conn: &Connection, ids: &[JournalId]) -> Result<Rollup>;

    /// Deletes the given rows and returns how many existed.
    ///
    /// Idempotent: deleting an already deleted id is a no-op.
    fn delete_all(&self, conn: &Connection, ids: &[JournalId]) -> Result<usize>;

    /// Keys with at least `min_entries` pending rows, ordered by warehouse then sku.
    fn keys_with_entries(&self, conn: &Connection, min_entries: usize) -> Result<Vec<InventoryKey>>;

    /// Pending deltas per key for many keys. Keys without rows are absent.
    fn rollups_for_keys(
        &self,
        conn: &Connection,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, Rollup>>;

    /// Pending deltas for `sku_code` per warehouse. Warehouses without rows
    /// are absent.
    fn rollups_for_sku(&self, conn: &Connection, sku_code: &str) -> Result<HashMap<i64, Rollup>>;

    /// Deletes every row for `key`.
    fn remove_by_key(&self, conn: &Connection, key: &InventoryKey) -> Result<usize>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

/// [`JournalRepository`] over the `inventory_journal` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteJournal;

impl JournalRepository for SqliteJournal {
    fn append(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        quantity_on_hand_delta: i64,
        allocated_quantity_delta: i64,
    ) -> Result<JournalEntry> {
        key.validate()?;
        let created_ms = current_time_ms();

        let mut stmt = conn.prepare_cached(
            "INSERT INTO inventory_journal
                 (sku_code, warehouse_id, quantity_on_hand_delta, allocated_quantity_delta, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            key.sku_code,
            key.warehouse_id,
            quantity_on_hand_delta,
            allocated_quantity_delta,
            created_ms as i64,
        ])?;
        let id = JournalId::from_raw(conn.last_insert_rowid());

        trace!(%key, %id, quantity_on_hand_delta, allocated_quantity_delta, "journal append");

        Ok(JournalEntry {
            id,
            key: key.clone(),
            quantity_on_hand_delta,
            allocated_quantity_delta,
            created_ms,
        })
    }

    fn snapshot_ids(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        limit: Option<usize>,
    ) -> Result<Vec<JournalId>> {
        // LIMIT -1 means unbounded in SQLite.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn.prepare_cached(
            "SELECT id FROM inventory_journal
             WHERE warehouse_id = ?1 AND sku_code = ?2
             ORDER BY id
             LIMIT ?3",
        )?;
        let ids = stmt
            .query_map(params![key.warehouse_id, key.sku_code, limit], |row| {
                row.get(0).map(JournalId::from_raw)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn sum(&self, conn: &Connection, ids: &[JournalId]) -> Result<Rollup> {
        if ids.is_empty() {
            return Ok(Rollup::ZERO);
        }

        let sql = format!(
            "SELECT COALESCE(SUM(quantity_on_hand_delta), 0),
                    COALESCE(SUM(allocated_quantity_delta), 0)
             FROM inventory_journal
             WHERE id IN ({})",
            placeholders(ids.len())
        );
        conn.query_row(&sql, params_from_iter(id_values(ids)), |row| {
            Ok(Rollup::new(row.get(0)?, row.get(1)?))
        })
        .map_err(|e| sum_error(e, || format!("{} journal rows", ids.len())))
    }

    fn delete_all(&self, conn: &Connection, ids: &[JournalId]) -> Result<usize> {
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let sql = format!(
                "DELETE FROM inventory_journal WHERE id IN ({})",
                placeholders(chunk.len())
            );
            deleted += conn.execute(&sql, params_from_iter(id_values(chunk)))?;
        }
        Ok(deleted)
    }

    fn keys_with_entries(&self, conn: &Connection, min_entries: usize) -> Result<Vec<InventoryKey>> {
        let mut stmt = conn.prepare_cached(
            "SELECT sku_code, warehouse_id FROM inventory_journal
             GROUP BY warehouse_id, sku_code
             HAVING COUNT(*) >= ?1
             ORDER BY warehouse_id, sku_code",
        )?;
        let keys = stmt
            .query_map([min_entries.max(1) as i64], |row| {
                Ok(InventoryKey::new(row.get::<_, String>(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn rollups_for_keys(
        &self,
        conn: &Connection,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, Rollup>> {
        let mut rollups = HashMap::with_capacity(keys.len());

        // Two parameters per key.
        for chunk in keys.chunks(MAX_IDS_PER_STATEMENT / 2) {
            let sql = format!(
                "SELECT sku_code, warehouse_id,
                        SUM(quantity_on_hand_delta), SUM(allocated_quantity_delta)
                 FROM inventory_journal
                 WHERE (warehouse_id, sku_code) IN (VALUES {})
                 GROUP BY warehouse_id, sku_code",
                vec!["(?, ?)"; chunk.len()].join(", ")
            );
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|k| [Value::Integer(k.warehouse_id), Value::Text(k.sku_code.clone())])
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    InventoryKey::new(row.get::<_, String>(0)?, row.get(1)?),
                    Rollup::new(row.get(2)?, row.get(3)?),
                ))
            })?;
            for row in rows {
                let (key, rollup) =
                    row.map_err(|e| sum_error(e, || format!("a batch of {} keys", chunk.len())))?;
                rollups.insert(key, rollup);
            }
        }

        Ok(rollups)
    }

    fn rollups_for_sku(&self, conn: &Connection, sku_code: &str) -> Result<HashMap<i64, Rollup>> {
        let mut stmt = conn.prepare_cached(
            "SELECT warehouse_id, SUM(quantity_on_hand_delta), SUM(allocated_quantity_delta)
             FROM inventory_journal
             WHERE sku_code = ?1
             GROUP BY warehouse_id",
        )?;
        let rows = stmt
            .query_map(params![sku_code], |row| {
                Ok((row.get::<_, i64>(0)?, Rollup::new(row.get(1)?, row.get(2)?)))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()
            .map_err(|e| sum_error(e, || format!("sku {sku_code}")))?;
        Ok(rows)
    }

    fn remove_by_key(&self, conn: &Connection, key: &InventoryKey) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM inventory_journal WHERE warehouse_id = ?1 AND sku_code = ?2",
            params![key.warehouse_id, key.sku_code],
        )?;
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================
