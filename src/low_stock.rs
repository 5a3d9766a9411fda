//! # Low-Stock Scanner
//!
//! Flags skus in one warehouse whose current on-hand quantity is low.
//!
//! The scan is one set-oriented query per chunk of skus: the base rows and
//! per-sku journal sums are joined in SQL, and the threshold filter runs in
//! memory on the aggregated rows.
//!
//! Keys that exist only in the journal (never compacted) are included; they
//! have no reorder minimum yet.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

use crate::error::Result;
use crate::journal::{sum_error, MAX_IDS_PER_STATEMENT};
use crate::txn;
use crate::types::{BaseInventory, InventoryKey, InventoryLevel, LowStockInfo, Rollup};

/// Batched read path for low-stock reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowStockScanner;

impl LowStockScanner {
    /// Keys among `sku_codes` in `warehouse_id` with on-hand strictly below
    /// `threshold`, ordered by sku code.
    ///
    /// An empty `sku_codes` scans the whole warehouse.
    pub fn find_low_stock(
        &self,
        conn: &Connection,
        sku_codes: &[String],
        warehouse_id: i64,
        threshold: i64,
    ) -> Result<Vec<LowStockInfo>> {
        let found = self.scan(conn, sku_codes, warehouse_id, |info| {
            info.quantity_on_hand < threshold
        })?;
        debug!(warehouse_id, skus = sku_codes.len(), threshold, found = found.len(), "low stock scan");
        Ok(found)
    }

    /// Keys whose on-hand is at or below their own reorder minimum.
    ///
    /// Only keys with a stock record carry a reorder minimum; journal-only
    /// keys are never reported.
    pub fn find_below_reorder_minimum(
        &self,
        conn: &Connection,
        sku_codes: &[String],
        warehouse_id: i64,
    ) -> Result<Vec<LowStockInfo>> {
        self.scan(conn, sku_codes, warehouse_id, |info| {
            info.reorder_minimum
                .is_some_and(|minimum| info.quantity_on_hand <= minimum)
        })
    }

    fn scan(
        &self,
        conn: &Connection,
        sku_codes: &[String],
        warehouse_id: i64,
        keep: impl Fn(&LowStockInfo) -> bool,
    ) -> Result<Vec<LowStockInfo>> {
        txn::read_snapshot(conn, |conn| {
            let mut found = Vec::new();
            if sku_codes.is_empty() {
                found.extend(aggregate(conn, warehouse_id, &[])?.into_iter().filter(|i| keep(i)));
            } else {
                for chunk in sku_codes.chunks(MAX_IDS_PER_STATEMENT - 1) {
                    found.extend(aggregate(conn, warehouse_id, chunk)?.into_iter().filter(|i| keep(i)));
                }
                found.sort_by(|a, b| a.key.sku_code.cmp(&b.key.sku_code));
                found.dedup_by(|a, b| a.key == b.key);
            }
            Ok(found)
        })
    }
}

/// Current counts for every key in the warehouse, optionally restricted to
/// `sku_codes`. Parameter `?1` is the warehouse, `?2..` the skus; numbered
/// parameters may repeat, so the filter is bound once and used three times.
///
/// Base and journal columns come back separately and are added in Rust:
/// SQLite turns an overflowing integer sum into a REAL.
fn aggregate(conn: &Connection, warehouse_id: i64, sku_codes: &[String]) -> Result<Vec<LowStockInfo>> {
    let filter = if sku_codes.is_empty() {
        String::new()
    } else {
        let numbered: Vec<String> = (0..sku_codes.len()).map(|i| format!("?{}", i + 2)).collect();
        format!("AND sku_code IN ({})", numbered.join(", "))
    };

    let sql = format!(
        "SELECT k.sku_code,
                b.quantity_on_hand,
                b.allocated_quantity,
                b.reorder_minimum,
                b.last_modified_ms,
                COALESCE(j.on_hand_delta, 0),
                COALESCE(j.allocated_delta, 0)
         FROM (
             SELECT sku_code FROM inventory_base    WHERE warehouse_id = ?1 {filter}
             UNION
             SELECT sku_code FROM inventory_journal WHERE warehouse_id = ?1 {filter}
         ) AS k
         LEFT JOIN inventory_base AS b
                ON b.warehouse_id = ?1 AND b.sku_code = k.sku_code
         LEFT JOIN (
             SELECT sku_code,
                    SUM(quantity_on_hand_delta)   AS on_hand_delta,
                    SUM(allocated_quantity_delta) AS allocated_delta
             FROM inventory_journal
             WHERE warehouse_id = ?1 {filter}
             GROUP BY sku_code
         ) AS j ON j.sku_code = k.sku_code
         ORDER BY k.sku_code"
    );

    let params: Vec<Value> = std::iter::once(Value::Integer(warehouse_id))
        .chain(sku_codes.iter().cloned().map(Value::Text))
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| parts_from_row(row, warehouse_id))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| sum_error(e, || format!("warehouse {warehouse_id}")))?;

    rows.into_iter()
        .map(|(key, base, pending)| {
            let reorder_minimum = base.as_ref().map(|b| b.reorder_minimum);
            let level = InventoryLevel::from_parts(key, base.as_ref(), pending)?;
            Ok(LowStockInfo {
                key: level.key,
                quantity_on_hand: level.quantity_on_hand,
                allocated_quantity: level.allocated_quantity,
                reorder_minimum,
            })
        })
        .collect()
}

/// Sku key, base row if one exists, and the pending journal sum.
fn parts_from_row(
    row: &Row<'_>,
    warehouse_id: i64,
) -> rusqlite::Result<(InventoryKey, Option<BaseInventory>, Rollup)> {
    let key = InventoryKey::new(row.get::<_, String>(0)?, warehouse_id);
    let base = match row.get::<_, Option<i64>>(1)? {
        Some(quantity_on_hand) => Some(BaseInventory {
            key: key.clone(),
            quantity_on_hand,
            allocated_quantity: row.get(2)?,
            reorder_minimum: row.get(3)?,
            last_modified_ms: row.get::<_, i64>(4)? as u64,
        }),
        None => None,
    };
    let pending = Rollup::new(row.get(5)?, row.get(6)?);
    Ok((key, base, pending))
}

// =============================================================================
// Tests
// =============================================================================
