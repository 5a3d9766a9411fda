//! # Base Store
//!
//! One row per key with the last compacted absolute counts. Quantities here
//! change only by folding a [`Rollup`] in; every other write path goes
//! through the journal.

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::journal::MAX_IDS_PER_STATEMENT;
use crate::types::{current_time_ms, BaseInventory, InventoryKey, Rollup};

/// Capability interface over the base table.
pub trait BaseRepository {
    /// The base row for `key`, if one has been created.
    fn get(&self, conn: &Connection, key: &InventoryKey) -> Result<Option<BaseInventory>>;

    /// Base rows for many keys in as few statements as the parameter limit allows.
    fn get_many(
        &self,
        conn: &Connection,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, BaseInventory>>;

    /// Base rows for `sku_code` in every warehouse.
    fn get_for_sku(&self, conn: &Connection, sku_code: &str) -> Result<Vec<BaseInventory>>;

    /// Adds `rollup` to the row for `key`, creating it at zero if absent.
    fn fold(&self, conn: &Connection, key: &InventoryKey, rollup: &Rollup) -> Result<()>;

    /// Creates the row with initial counts. Returns false if it already existed.
    fn register(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        quantity_on_hand: i64,
        reorder_minimum: i64,
    ) -> Result<bool>;

    /// Updates reorder metadata. Returns false if there is no row for `key`.
    fn set_reorder_minimum(&self, conn: &Connection, key: &InventoryKey, minimum: i64) -> Result<bool>;

    /// Deletes the row. Returns false if there was none.
    fn remove(&self, conn: &Connection, key: &InventoryKey) -> Result<bool>;
}

/// [`BaseRepository`] over the `inventory_base` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBase;

const SELECT_COLUMNS: &str =
    "sku_code, warehouse_id, quantity_on_hand, allocated_quantity, reorder_minimum, last_modified_ms";

fn base_from_row(row: &Row<'_>) -> rusqlite::Result<BaseInventory> {
    Ok(BaseInventory {
        key: InventoryKey::new(row.get::<_, String>(0)?, row.get(1)?),
        quantity_on_hand: row.get(2)?,
        allocated_quantity: row.get(3)?,
        reorder_minimum: row.get(4)?,
        last_modified_ms: row.get::<_, i64>(5)? as u64,
    })
}

impl BaseRepository for SqliteBase {
    fn get(&self, conn: &Connection, key: &InventoryKey) -> Result<Option<BaseInventory>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_base WHERE warehouse_id = ?1 AND sku_code = ?2"
        );
        let base = conn
            .prepare_cached(&sql)?
            .query_row(params![key.warehouse_id, key.sku_code], base_from_row)
            .optional()?;
        Ok(base)
    }

    fn get_for_sku(&self, conn: &Connection, sku_code: &str) -> Result<Vec<BaseInventory>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_base WHERE sku_code = ?1 ORDER BY warehouse_id"
        );
        let rows = conn
            .prepare_cached(&sql)?
            .query_map(params![sku_code], base_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_many(
        &self,
        conn: &Connection,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, BaseInventory>> {
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(MAX_IDS_PER_STATEMENT / 2) {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM inventory_base
                 WHERE (warehouse_id, sku_code) IN (VALUES {})",
                vec!["(?, ?)"; chunk.len()].join(", ")
            );
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|k| [Value::Integer(k.warehouse_id), Value::Text(k.sku_code.clone())])
                .collect();

            let mut stmt = conn.prepare(&sql)?;
            for base in stmt.query_map(params_from_iter(values.iter()), base_from_row)? {
                let base = base?;
                found.insert(base.key.clone(), base);
            }
        }

        Ok(found)
    }

    fn fold(&self, conn: &Connection, key: &InventoryKey, rollup: &Rollup) -> Result<()> {
        // SQLite turns an overflowing integer sum into a REAL.
        if let Some(current) = self.get(conn, key)? {
            Rollup::new(current.quantity_on_hand, current.allocated_quantity)
                .checked_add(*rollup)
                .ok_or_else(|| Error::QuantityOverflow(key.to_string()))?;
        }

        conn.prepare_cached(
            "INSERT INTO inventory_base
                 (sku_code, warehouse_id, quantity_on_hand, allocated_quantity, last_modified_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (sku_code, warehouse_id) DO UPDATE SET
                 quantity_on_hand   = quantity_on_hand   + excluded.quantity_on_hand,
                 allocated_quantity = allocated_quantity + excluded.allocated_quantity,
                 last_modified_ms   = excluded.last_modified_ms",
        )?
        .execute(params![
            key.sku_code,
            key.warehouse_id,
            rollup.quantity_on_hand_delta,
            rollup.allocated_quantity_delta,
            current_time_ms() as i64,
        ])?;
        Ok(())
    }

    fn register(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        quantity_on_hand: i64,
        reorder_minimum: i64,
    ) -> Result<bool> {
        key.validate()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO inventory_base
                 (sku_code, warehouse_id, quantity_on_hand, allocated_quantity, reorder_minimum, last_modified_ms)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                key.sku_code,
                key.warehouse_id,
                quantity_on_hand,
                reorder_minimum,
                current_time_ms() as i64,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn set_reorder_minimum(&self, conn: &Connection, key: &InventoryKey, minimum: i64) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE inventory_base SET reorder_minimum = ?3, last_modified_ms = ?4
             WHERE warehouse_id = ?1 AND sku_code = ?2",
            params![key.warehouse_id, key.sku_code, minimum, current_time_ms() as i64],
        )?;
        Ok(updated == 1)
    }

    fn remove(&self, conn: &Connection, key: &InventoryKey) -> Result<bool> {
        let removed = conn.execute(
            "DELETE FROM inventory_base WHERE warehouse_id = ?1 AND sku_code = ?2",
            params![key.warehouse_id, key.sku_code],
        )?;
        Ok(removed == 1)
    }
}
