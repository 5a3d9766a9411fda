//! # Inventory Journal - Concurrent Stock Accounting on SQLite
//!
//! Tracks on-hand and allocated quantity per (sku, warehouse) under heavy
//! concurrent write pressure without making every writer contend on one
//! counter row:
//!
//! - **Append-only journal**: every adjustment is one immutable delta row
//! - **Base rows**: last compacted absolute counts per key
//! - **Per-key compaction**: lock → snapshot → sum → atomic fold → delete
//! - **Consistent reads**: base + Σ pending deltas from one WAL snapshot
//! - **Batched scans**: low-stock reports in one aggregate query
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    InventoryEngine (async)                      │
//! │        adjust · get_quantity · find_low_stock · compact         │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ mpsc / oneshot
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Worker threads (one Connection each)               │
//! │                                                                 │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌────────────────┐   │
//! │  │  Writer   │ │  Reader   │ │ Compactor │ │ LowStockScanner│   │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘ └───────┬────────┘   │
//! │        ▼             ▼             ▼               ▼            │
//! │   JournalRepository · BaseRepository · LockRepository           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SQLite (WAL)                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Accounting**: `quantity(key) == base(key) + Σ journal(key)` at every
//!    observable instant, for on-hand and allocated alike
//! 2. **Append never waits on compaction**: writers never read lock rows
//! 3. **One compactor per key**: enforced by store-backed lock rows with a
//!    lease and a fence
//! 4. **Atomic fold**: base update and journal delete commit together
//! 5. **Ids never reused**: a stale snapshot can never name a newer row
//!
//! ## Module Organization
//!
//! - [`error`]: Error enum and `Result` alias
//! - [`schema`]: SQLite DDL, pragmas and versioning
//! - [`txn`]: Transaction demarcation helpers
//! - [`types`]: Keys, journal entries, rollups, read-side views
//! - [`journal`], [`base`], [`lock`]: Repository traits and SQLite implementations
//! - [`rollup`]: Snapshot summation
//! - [`compactor`]: The per-key compaction state machine
//! - [`writer`], [`reader`], [`low_stock`]: Write, read and scan paths
//! - [`config`]: Engine configuration
//! - [`engine`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for inventory operations.
pub mod error;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// BEGIN / COMMIT / ROLLBACK helpers over a shared connection.
pub mod txn;

/// Domain types.
pub mod types;

/// Append-only delta log.
pub mod journal;

/// Compacted per-key counts.
pub mod base;

/// Per-key compaction locks with leases and fencing.
pub mod lock;

/// Summation of journal snapshots.
pub mod rollup;

/// Folding journal rows into base rows.
pub mod compactor;

/// Write path and stock record lifecycle.
pub mod writer;

/// Read path.
pub mod reader;

/// Batched low-stock scans.
pub mod low_stock;

/// Engine configuration.
pub mod config;

/// Async API.
///
/// The main entry point is [`InventoryEngine`](engine::InventoryEngine).
pub mod engine;

// =============================================================================
// Re-exports
// =============================================================================

pub use base::{BaseRepository, SqliteBase};
pub use compactor::{
    CompactionOutcome, CompactionState, CompactionStats, Compactor, CompactorConfig,
};
pub use config::EngineConfig;
pub use engine::{InventoryEngine, StockCommand};
pub use error::{Error, Result};
pub use journal::{JournalRepository, SqliteJournal};
pub use lock::{LockRepository, SqliteLocks};
pub use low_stock::LowStockScanner;
pub use reader::InventoryReader;
pub use rollup::RollupCalculator;
pub use schema::Database;
pub use types::{
    BaseInventory, InventoryKey, InventoryLevel, JournalEntry, JournalId, Lease, LowStockInfo, Rollup,
};
pub use writer::InventoryWriter;
