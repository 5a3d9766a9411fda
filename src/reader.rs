//! # Inventory Reader
//!
//! Current quantity for a key is `base + Σ uncompacted journal deltas`.
//!
//! ## Read Consistency
//!
//! ```text
//!   reader                         compactor (same key)
//!   ──────                         ────────────────────
//!   BEGIN (snapshot S)
//!   read base row        ◄─ S ─►   BEGIN IMMEDIATE
//!                                    base += rollup
//!                                    delete folded rows
//!                                  COMMIT
//!   read journal ids     ◄─ S ─►
//!   sum ids
//!   COMMIT
//! ```
//!
//! Both reads come from WAL snapshot `S`, so the reader sees the fold
//! entirely or not at all. Reads never take a compaction lock and nothing
//! is cached between calls.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::base::{BaseRepository, SqliteBase};
use crate::error::Result;
use crate::journal::{JournalRepository, SqliteJournal};
use crate::rollup::RollupCalculator;
use crate::txn;
use crate::types::{InventoryKey, InventoryLevel, Rollup};

/// Read path over the base and journal stores.
#[derive(Debug, Clone)]
pub struct InventoryReader<J = SqliteJournal, B = SqliteBase> {
    journal: J,
    base: B,
    calculator: RollupCalculator,
}

impl Default for InventoryReader {
    fn default() -> Self {
        Self::new(SqliteJournal, SqliteBase)
    }
}

impl<J, B> InventoryReader<J, B>
where
    J: JournalRepository,
    B: BaseRepository,
{
    pub fn new(journal: J, base: B) -> Self {
        Self {
            journal,
            base,
            calculator: RollupCalculator::default(),
        }
    }

    /// Current counts for `key`.
    ///
    /// A key with no base row and no journal rows reads as zero.
    pub fn get_quantity(&self, conn: &Connection, key: &InventoryKey) -> Result<InventoryLevel> {
        txn::read_snapshot(conn, |conn| {
            let base = self.base.get(conn, key)?;
            let ids = self.journal.snapshot_ids(conn, key, None)?;
            let pending = self.calculator.calculate(&self.journal, conn, key, &ids)?;
            InventoryLevel::from_parts(key.clone(), base.as_ref(), pending)
        })
    }

    /// Current counts for many keys.
    ///
    /// One base fetch and one grouped journal sum, both inside one read
    /// snapshot. Keys with neither a base row nor journal rows are omitted.
    pub fn get_inventory_map(
        &self,
        conn: &Connection,
        keys: &[InventoryKey],
    ) -> Result<HashMap<InventoryKey, InventoryLevel>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        txn::read_snapshot(conn, |conn| {
            let mut bases = self.base.get_many(conn, keys)?;
            let mut pending = self.journal.rollups_for_keys(conn, keys)?;

            let mut levels = HashMap::with_capacity(keys.len());
            for key in keys {
                let base = bases.remove(key);
                let rollup = pending.remove(key);
                if base.is_none() && rollup.is_none() {
                    continue;
                }
                let level = InventoryLevel::from_parts(
                    key.clone(),
                    base.as_ref(),
                    rollup.unwrap_or(Rollup::ZERO),
                )?;
                levels.insert(key.clone(), level);
            }
            Ok(levels)
        })
    }

    /// Current counts for one sku in every warehouse that stocks it,
    /// keyed by warehouse id.
    ///
    /// A warehouse appears if it has a base row or pending journal rows
    /// for the sku.
    pub fn get_inventories_for_sku(
        &self,
        conn: &Connection,
        sku_code: &str,
    ) -> Result<HashMap<i64, InventoryLevel>> {
        txn::read_snapshot(conn, |conn| {
            let bases = self.base.get_for_sku(conn, sku_code)?;
            let mut pending = self.journal.rollups_for_sku(conn, sku_code)?;

            let mut levels = HashMap::with_capacity(bases.len() + pending.len());
            for base in &bases {
                let warehouse_id = base.key.warehouse_id;
                let rollup = pending.remove(&warehouse_id).unwrap_or(Rollup::ZERO);
                let level = InventoryLevel::from_parts(base.key.clone(), Some(base), rollup)?;
                levels.insert(warehouse_id, level);
            }
            for (warehouse_id, rollup) in pending {
                let key = InventoryKey::new(sku_code, warehouse_id);
                levels.insert(warehouse_id, InventoryLevel::from_parts(key, None, rollup)?);
            }
            Ok(levels)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
