//! # Compaction Lock
//!
//! Per-key advisory lock rows that serialize compactors of the *same* key.
//! Writers and readers never look at this table.
//!
//! ## Acquisition Protocol
//!
//! ```text
//!   try_acquire(key)                       one atomic UPSERT
//!   ┌───────────────────────────┐
//!   │ row absent            ──► │ insert held=1, fence=1       → Some(lease)
//!   │ held=0                ──► │ held=1, fence+1              → Some(lease)
//!   │ held=1, lease expired ──► │ take over, fence+1           → Some(lease)
//!   │ held=1, lease live    ──► │ no change                    → None
//!   └───────────────────────────┘
//! ```
//!
//! `None` is the normal "someone else is compacting this key" answer, not
//! an error. Callers skip the key for this cycle and never spin.
//!
//! ## Systems Concept: Leases and Fencing
//!
//! A compactor that crashes while holding a lock would otherwise block its
//! key forever. Locks therefore carry a lease expiry. Expiry alone is not
//! safe: a slow (not dead) compactor could resume after a takeover. The
//! fence number closes that gap; the fold transaction calls [`LockRepository::verify`]
//! and aborts unless its fence is still the current one.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{current_time_ms, InventoryKey, Lease};

/// Capability interface over the lock table.
pub trait LockRepository {
    /// Non-blocking acquire. `None` if a live lease is held by someone else.
    fn try_acquire(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<Lease>>;

    /// Releases the lock if `lease` still owns it; otherwise a no-op.
    fn release(&self, conn: &Connection, key: &InventoryKey, lease: &Lease) -> Result<()>;

    /// Fails with [`Error::LeaseLost`] unless `lease` is the current holder.
    ///
    /// Intended to run inside the transaction whose commit it guards.
    fn verify(&self, conn: &Connection, key: &InventoryKey, lease: &Lease) -> Result<()>;

    /// Whether a live lease is currently held on `key`.
    fn is_held(&self, conn: &Connection, key: &InventoryKey) -> Result<bool>;

    /// Drops the lock row; any outstanding lease for `key` stops verifying.
    fn remove_by_key(&self, conn: &Connection, key: &InventoryKey) -> Result<()>;
}

/// [`LockRepository`] over the `compaction_locks` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLocks;

impl LockRepository for SqliteLocks {
    fn try_acquire(
        &self,
        conn: &Connection,
        key: &InventoryKey,
        holder: &str,
        lease: Duration,
    ) -> Result<Option<Lease>> {
        let now = current_time_ms();
        let expires_ms = now.saturating_add(lease.as_millis() as u64);

        let fence: Option<i64> = conn
            .prepare_cached(
                "INSERT INTO compaction_locks
                     (sku_code, warehouse_id, held, holder_token, lease_expires_ms, fence)
                 VALUES (?1, ?2, 1, ?3, ?4, 1)
                 ON CONFLICT (sku_code, warehouse_id) DO UPDATE SET
                     held             = 1,
                     holder_token     = excluded.holder_token,
                     lease_expires_ms = excluded.lease_expires_ms,
                     fence            = fence + 1
                 WHERE held = 0 OR lease_expires_ms <= ?5
                 RETURNING fence",
            )?
            .query_row(
                params![key.sku_code, key.warehouse_id, holder, expires_ms as i64, now as i64],
                |row| row.get(0),
            )
            .optional()?;

        Ok(fence.map(|fence| Lease {
            holder: holder.to_string(),
            fence,
            expires_ms,
        }))
    }

    fn release(&self, conn: &Connection, key: &InventoryKey, lease: &Lease) -> Result<()> {
        let released = conn.execute(
            "UPDATE compaction_locks
             SET held = 0, holder_token = NULL, lease_expires_ms = 0
             WHERE sku_code = ?1 AND warehouse_id = ?2 AND holder_token = ?3",
            params![key.sku_code, key.warehouse_id, lease.holder],
        )?;
        if released == 0 {
            debug!(%key, fence = lease.fence, "release found no lock owned by this holder");
        }
        Ok(())
    }

    fn verify(&self, conn: &Connection, key: &InventoryKey, lease: &Lease) -> Result<()> {
        let current: Option<i64> = conn
            .prepare_cached(
                "SELECT fence FROM compaction_locks
                 WHERE sku_code = ?1 AND warehouse_id = ?2 AND held = 1 AND holder_token = ?3",
            )?
            .query_row(params![key.sku_code, key.warehouse_id, lease.holder], |row| row.get(0))
            .optional()?;

        match current {
            Some(fence) if fence == lease.fence => Ok(()),
            _ => Err(Error::LeaseLost {
                key: key.to_string(),
                fence: lease.fence,
            }),
        }
    }

    fn is_held(&self, conn: &Connection, key: &InventoryKey) -> Result<bool> {
        let held = conn
            .query_row(
                "SELECT 1 FROM compaction_locks
                 WHERE sku_code = ?1 AND warehouse_id = ?2 AND held = 1 AND lease_expires_ms > ?3",
                params![key.sku_code, key.warehouse_id, current_time_ms() as i64],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(held)
    }

    fn remove_by_key(&self, conn: &Connection, key: &InventoryKey) -> Result<()> {
        conn.execute(
            "DELETE FROM compaction_locks WHERE sku_code = ?1 AND warehouse_id = ?2",
            params![key.sku_code, key.warehouse_id],
        )?;
        Ok(())
    }
}
