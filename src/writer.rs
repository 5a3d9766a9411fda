//! # Inventory Writer
//!
//! The write path. Every quantity change becomes one journal row; the base
//! row is never touched here, so concurrent writers never contend on it.
//!
//! ## Lifecycle Commands
//!
//! | Command          | on-hand Δ | allocated Δ | Accepted quantity |
//! |------------------|-----------|-------------|-------------------|
//! | `adjust_on_hand` | `+q`      | `0`         | any               |
//! | `allocate`       | `0`       | `+q`        | `q >= 0`          |
//! | `deallocate`     | `0`       | `-q`        | `q >= 0`          |
//! | `release`        | `-q`      | `-q`        | `q > 0`           |
//!
//! `release` is the shipment step: allocated stock physically leaves the
//! warehouse, so both counters drop together.
//!
//! Stock record management (`register`, `set_reorder_minimum`, `remove`)
//! lives here too because it is the only other writer of inventory rows.

use rusqlite::Connection;
use tracing::{debug, trace};

use crate::base::{BaseRepository, SqliteBase};
use crate::error::{Error, Result};
use crate::journal::{JournalRepository, SqliteJournal};
use crate::lock::{LockRepository, SqliteLocks};
use crate::txn;
use crate::types::{InventoryKey, JournalEntry};

/// Append-only write path plus stock record lifecycle.
#[derive(Debug, Clone)]
pub struct InventoryWriter<J = SqliteJournal, B = SqliteBase, L = SqliteLocks> {
    journal: J,
    base: B,
    locks: L,
}

impl Default for InventoryWriter {
    fn default() -> Self {
        Self::new(SqliteJournal, SqliteBase, SqliteLocks)
    }
}

impl<J, B, L> InventoryWriter<J, B, L>
where
    J: JournalRepository,
    B: BaseRepository,
    L: LockRepository,
{
    pub fn new(journal: J, base: B, locks: L) -> Self {
        Self { journal, base, locks }
    }

    // =========================================================================
    // Quantity Changes
    // =========================================================================

    /// Records a signed change to on-hand and allocated quantity.
    ///
    /// Never blocks on compaction. Storage failures are returned, never
    /// retried here.
    pub fn adjust(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        quantity_on_hand_delta: i64,
        allocated_quantity_delta: i64,
    ) -> Result<JournalEntry> {
        self.journal
            .append(conn, key, quantity_on_hand_delta, allocated_quantity_delta)
    }

    /// Stock received or counted: changes on-hand only.
    pub fn adjust_on_hand(&self, conn: &Connection, key: &InventoryKey, quantity: i64) -> Result<JournalEntry> {
        self.adjust(conn, key, quantity, 0)
    }

    /// Reserves `quantity` for an order.
    pub fn allocate(&self, conn: &Connection, key: &InventoryKey, quantity: i64) -> Result<JournalEntry> {
        ensure_quantity("allocate", quantity, 0)?;
        self.adjust(conn, key, 0, quantity)
    }

    /// Returns a reservation, e.g. on order cancellation.
    pub fn deallocate(&self, conn: &Connection, key: &InventoryKey, quantity: i64) -> Result<JournalEntry> {
        ensure_quantity("deallocate", quantity, 0)?;
        let delta = quantity.checked_neg().ok_or(Error::InvalidQuantity {
            operation: "deallocate",
            quantity,
        })?;
        self.adjust(conn, key, 0, delta)
    }

    /// Ships allocated stock: both on-hand and allocated drop by `quantity`.
    pub fn release(&self, conn: &Connection, key: &InventoryKey, quantity: i64) -> Result<JournalEntry> {
        ensure_quantity("release", quantity, 1)?;
        let delta = -quantity;
        self.adjust(conn, key, delta, delta)
    }

    // =========================================================================
    // Stock Records
    // =========================================================================

    /// Creates the stock record with an initial count.
    ///
    /// Returns false, changing nothing, if the record already exists.
    pub fn register(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        initial_on_hand: i64,
        reorder_minimum: i64,
    ) -> Result<bool> {
        let created = self.base.register(conn, key, initial_on_hand, reorder_minimum)?;
        debug!(%key, initial_on_hand, reorder_minimum, created, "register stock record");
        Ok(created)
    }

    /// Sets the per-record reorder threshold. False if no record exists.
    pub fn set_reorder_minimum(&self, conn: &Connection, key: &InventoryKey, minimum: i64) -> Result<bool> {
        self.base.set_reorder_minimum(conn, key, minimum)
    }

    /// Removes the sku from the warehouse: base row, pending journal rows
    /// and the lock row go in one transaction.
    ///
    /// A compactor mid-pass on this key loses its lease and rolls back.
    /// Returns true if anything existed.
    pub fn remove(&self, conn: &Connection, key: &InventoryKey) -> Result<bool> {
        txn::immediate(conn, |conn| {
            let had_base = self.base.remove(conn, key)?;
            let journal_rows = self.journal.remove_by_key(conn, key)?;
            self.locks.remove_by_key(conn, key)?;

            trace!(%key, had_base, journal_rows, "stock record removed");
            Ok(had_base || journal_rows > 0)
        })
    }
}

fn ensure_quantity(operation: &'static str, quantity: i64, minimum: i64) -> Result<()> {
    if quantity < minimum {
        return Err(Error::InvalidQuantity { operation, quantity });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
