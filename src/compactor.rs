//! # Compactor
//!
//! Folds journal rows into the base row for one key at a time.
//!
//! ## State Machine (per key, per cycle)
//!
//! ```text
//!   Idle ──► Locking ──lock busy──► Skipped        (no side effects)
//!               │
//!               ▼
//!            Snapshot ──no rows──► Done (Empty)
//!               │
//!               ▼
//!            Summing
//!               │
//!               ▼
//!            Folding   BEGIN IMMEDIATE
//!               │        verify fence
//!               │        base += rollup
//!               │        delete snapshot ids
//!               │      COMMIT  (or ROLLBACK on any error)
//!               ▼
//!            Done (Folded)
//! ```
//!
//! The lock is released on every path out of `Locking`, including errors.
//! A failed pass leaves base and journal untouched; the next pass takes a
//! fresh snapshot. Rows appended after the snapshot are not part of it and
//! stay in the journal for the next cycle.
//!
//! ## Why the Fold Is One Transaction
//!
//! Readers compute `base + Σ journal`. Updating the base and deleting the
//! folded rows in separate commits would let a reader count the same deltas
//! twice (after the base update) or not at all (after the delete). Inside
//! one transaction, a reader's WAL snapshot sees both halves or neither.

use std::fmt;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::base::{BaseRepository, SqliteBase};
use crate::error::{Error, Result};
use crate::journal::{JournalRepository, SqliteJournal};
use crate::lock::{LockRepository, SqliteLocks};
use crate::rollup::RollupCalculator;
use crate::txn;
use crate::types::{InventoryKey, Lease, Rollup};

// =============================================================================
// Configuration
// =============================================================================

/// Default lease on a per-key compaction lock.
pub const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;

/// Default cap on journal rows folded by one pass.
///
/// One default pass deletes its rows in a single statement, so the fold
/// holds the database write lock only briefly.
pub const DEFAULT_MAX_ENTRIES_PER_PASS: usize = 500;

/// Tuning for a [`Compactor`].
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// How long an acquired lock stays valid without being released.
    ///
    /// Must comfortably exceed the time one pass takes.
    pub lease_duration: Duration,

    /// Maximum journal rows in one snapshot. Larger backlogs drain over
    /// several passes, keeping each write transaction short.
    pub max_entries_per_pass: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_millis(DEFAULT_LEASE_DURATION_MS),
            max_entries_per_pass: DEFAULT_MAX_ENTRIES_PER_PASS,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Steps of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    Idle,
    Locking,
    Snapshot,
    Summing,
    Folding,
    Done,
    Skipped,
}

impl fmt::Display for CompactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompactionState::Idle => "IDLE",
            CompactionState::Locking => "LOCKING",
            CompactionState::Snapshot => "SNAPSHOT",
            CompactionState::Summing => "SUMMING",
            CompactionState::Folding => "FOLDING",
            CompactionState::Done => "DONE",
            CompactionState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Result of a successful compaction pass over one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Another compactor holds the key's lock.
    Skipped,
    /// Lock acquired, nothing to fold.
    Empty,
    /// `entries` journal rows were folded into the base row.
    Folded { entries: usize, rollup: Rollup },
}

impl CompactionOutcome {
    /// The terminal state the pass ended in.
    pub fn final_state(&self) -> CompactionState {
        match self {
            CompactionOutcome::Skipped => CompactionState::Skipped,
            CompactionOutcome::Empty | CompactionOutcome::Folded { .. } => CompactionState::Done,
        }
    }
}

/// Totals for a sweep over many keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Keys the sweep attempted
    pub keys_scanned: usize,
    /// Keys whose rows were folded
    pub keys_folded: usize,
    /// Keys locked by another compactor
    pub keys_skipped: usize,
    /// Keys whose pass returned an error
    pub keys_failed: usize,
    /// Journal rows folded across all keys
    pub entries_folded: usize,
}

impl CompactionStats {
    /// Accounts for one key's pass.
    pub fn record(&mut self, outcome: &Result<CompactionOutcome>) {
        self.keys_scanned += 1;
        match outcome {
            Ok(CompactionOutcome::Folded { entries, .. }) => {
                self.keys_folded += 1;
                self.entries_folded += entries;
            }
            Ok(CompactionOutcome::Skipped) => self.keys_skipped += 1,
            Ok(CompactionOutcome::Empty) => {}
            Err(_) => self.keys_failed += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.keys_folded == 0 && self.keys_failed == 0
    }
}

// =============================================================================
// Compactor
// =============================================================================

/// Runs compaction passes against the three repositories.
///
/// # Rust Pattern: Default Type Parameters
///
/// `Compactor` is generic over its repositories so tests can substitute
/// them, while `Compactor::default()` wires up the SQLite implementations.
#[derive(Debug, Clone)]
pub struct Compactor<J = SqliteJournal, B = SqliteBase, L = SqliteLocks> {
    journal: J,
    base: B,
    locks: L,
    calculator: RollupCalculator,
    config: CompactorConfig,
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(SqliteJournal, SqliteBase, SqliteLocks, CompactorConfig::default())
    }
}

impl Compactor {
    /// SQLite-backed compactor with the given tuning.
    pub fn with_config(config: CompactorConfig) -> Self {
        Self::new(SqliteJournal, SqliteBase, SqliteLocks, config)
    }
}

impl<J, B, L> Compactor<J, B, L>
where
    J: JournalRepository,
    B: BaseRepository,
    L: LockRepository,
{
    pub fn new(journal: J, base: B, locks: L, config: CompactorConfig) -> Self {
        Self {
            journal,
            base,
            locks,
            calculator: RollupCalculator::default(),
            config,
        }
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    /// Runs one pass over `key`.
    ///
    /// `conn` must be in autocommit mode: the fold opens its own write
    /// transaction.
    pub fn compact(&self, conn: &Connection, key: &InventoryKey) -> Result<CompactionOutcome> {
        let holder = Uuid::new_v4().to_string();
        trace!(%key, state = %CompactionState::Locking, "compaction");

        let Some(lease) = self
            .locks
            .try_acquire(conn, key, &holder, self.config.lease_duration)?
        else {
            debug!(%key, state = %CompactionState::Skipped, "compaction lock held elsewhere");
            return Ok(CompactionOutcome::Skipped);
        };

        let result = self.compact_locked(conn, key, &lease);

        if let Err(e) = self.locks.release(conn, key, &lease) {
            warn!(%key, fence = lease.fence, error = %e, "failed to release compaction lock; lease will expire");
        }
        if let Err(e) = &result {
            warn!(%key, fence = lease.fence, error = %e, "compaction pass rolled back");
        }

        result
    }

    fn compact_locked(&self, conn: &Connection, key: &InventoryKey, lease: &Lease) -> Result<CompactionOutcome> {
        trace!(%key, state = %CompactionState::Snapshot, "compaction");
        let ids = self
            .journal
            .snapshot_ids(conn, key, Some(self.config.max_entries_per_pass))?;
        if ids.is_empty() {
            trace!(%key, state = %CompactionState::Done, "nothing to compact");
            return Ok(CompactionOutcome::Empty);
        }

        trace!(%key, state = %CompactionState::Summing, entries = ids.len(), "compaction");
        let rollup = self.calculator.calculate(&self.journal, conn, key, &ids)?;

        trace!(%key, state = %CompactionState::Folding, "compaction");
        txn::immediate(conn, |conn| {
            self.locks.verify(conn, key, lease)?;
            self.base.fold(conn, key, &rollup)?;

            let deleted = self.journal.delete_all(conn, &ids)?;
            if deleted != ids.len() {
                return Err(Error::SnapshotChanged {
                    key: key.to_string(),
                    expected: ids.len(),
                    deleted,
                });
            }
            Ok(())
        })?;

        debug!(
            %key,
            state = %CompactionState::Done,
            entries = ids.len(),
            on_hand_delta = rollup.quantity_on_hand_delta,
            allocated_delta = rollup.allocated_quantity_delta,
            "journal folded into base"
        );

        Ok(CompactionOutcome::Folded {
            entries: ids.len(),
            rollup,
        })
    }

    /// Keys with at least `min_entries` pending rows.
    pub fn pending_keys(&self, conn: &Connection, min_entries: usize) -> Result<Vec<InventoryKey>> {
        self.journal.keys_with_entries(conn, min_entries)
    }

    /// Runs one pass over every key with pending rows.
    ///
    /// A failing key is logged and counted; the sweep carries on with the rest.
    pub fn compact_pending(&self, conn: &Connection, min_entries: usize) -> Result<CompactionStats> {
        let mut stats = CompactionStats::default();
        for key in self.pending_keys(conn, min_entries)? {
            stats.record(&self.compact(conn, &key));
        }
        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================
