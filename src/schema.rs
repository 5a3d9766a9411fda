//! # SQLite Schema for the Inventory Journal
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  inventory_journal          inventory_base           compaction_locks   │
//! │  ┌──────────────────┐       ┌──────────────────┐     ┌────────────────┐ │
//! │  │ id (PK, AUTOINC) │       │ sku_code    (PK) │     │ sku_code   (PK)│ │
//! │  │ sku_code         │ fold  │ warehouse_id(PK) │     │ warehouse_id   │ │
//! │  │ warehouse_id     │──────►│ quantity_on_hand │     │ held           │ │
//! │  │ on_hand delta    │       │ allocated_qty    │     │ holder_token   │ │
//! │  │ allocated delta  │       │ reorder_minimum  │     │ lease_expires  │ │
//! │  │ created_ms       │       │ last_modified_ms │     │ fence          │ │
//! │  └──────────────────┘       └──────────────────┘     └────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why a journal instead of updating the base row?
//!
//! Hot SKUs receive many concurrent adjustments. An `UPDATE ... SET qty =
//! qty + ?` on one row turns every writer into a contender for that row.
//! Appending an immutable delta row never contends on application state;
//! the compactor folds deltas into the base row later, in bulk.
//!
//! ### Why AUTOINCREMENT on the journal?
//!
//! Compaction works on an explicit id list. Plain rowids may be reused after
//! deletion, which would let a stale id list name a newer row. AUTOINCREMENT
//! guarantees ids are never reused.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
const SCHEMA_VERSION: i32 = 1;

/// Default time a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `inventory_journal` table: append-only signed deltas.
///
/// Rows are immutable once written. They are deleted only after being
/// folded into `inventory_base`, or when the sku is removed from the
/// warehouse.
const CREATE_JOURNAL: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_journal (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    sku_code                 TEXT    NOT NULL,
    warehouse_id             INTEGER NOT NULL,
    quantity_on_hand_delta   INTEGER NOT NULL,
    allocated_quantity_delta INTEGER NOT NULL,
    created_ms               INTEGER NOT NULL
)
"#;

/// Supports both "ids for key" snapshots and warehouse-wide grouped sums.
const CREATE_JOURNAL_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS inventory_journal_key
ON inventory_journal(warehouse_id, sku_code, id)
"#;

/// The `inventory_base` table: last compacted absolute counts per key.
///
/// `quantity_on_hand` and `allocated_quantity` change only through a
/// compaction fold. `reorder_minimum` is plain metadata.
const CREATE_BASE: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_base (
    sku_code           TEXT    NOT NULL,
    warehouse_id       INTEGER NOT NULL,
    quantity_on_hand   INTEGER NOT NULL DEFAULT 0,
    allocated_quantity INTEGER NOT NULL DEFAULT 0,
    reorder_minimum    INTEGER NOT NULL DEFAULT 0,
    last_modified_ms   INTEGER NOT NULL,
    PRIMARY KEY (sku_code, warehouse_id)
)
"#;

/// Warehouse scans for the low-stock path.
const CREATE_BASE_WAREHOUSE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS inventory_base_warehouse
ON inventory_base(warehouse_id, sku_code)
"#;

/// The `compaction_locks` table: one advisory lock row per key.
///
/// # Columns
///
/// - `held`: 1 while a compactor owns the key
/// - `holder_token`: unique per acquisition, used for release and fencing
/// - `lease_expires_ms`: after this instant the lock may be taken over
/// - `fence`: bumped on every acquisition
const CREATE_LOCKS: &str = r#"
CREATE TABLE IF NOT EXISTS compaction_locks (
    sku_code         TEXT    NOT NULL,
    warehouse_id     INTEGER NOT NULL,
    held             INTEGER NOT NULL DEFAULT 0,
    holder_token     TEXT,
    lease_expires_ms INTEGER NOT NULL DEFAULT 0,
    fence            INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (sku_code, warehouse_id)
)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Connections
// =============================================================================

/// Opens an extra connection to an already initialized database file.
///
/// Every concurrent actor (worker thread, test thread, separate process)
/// gets its own connection; SQLite connections are `!Sync`.
pub fn open_connection(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    Ok(conn)
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // NORMAL syncs the WAL on commit but not every write.
    conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    Ok(())
}

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the inventory schema initialized.
///
/// # Rust Pattern: Newtype Wrapper
///
/// Wrapping `Connection` guarantees that anything holding a `Database` has
/// gone through [`Database::initialize`].
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Storage` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }

    /// Like [`Database::open`], with an explicit busy timeout.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize(busy_timeout)?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// In-memory databases are private to their connection, so every
    /// component under test must share this one connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        Ok(db)
    }

    fn initialize(&mut self, busy_timeout: Duration) -> Result<()> {
        // WAL: readers see a consistent snapshot while a fold commits, and
        // appends never wait for readers.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        configure(&self.conn, busy_timeout)?;

        // Using IF NOT EXISTS makes this idempotent.
        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_JOURNAL)?;
        self.conn.execute_batch(CREATE_JOURNAL_KEY_INDEX)?;
        self.conn.execute_batch(CREATE_BASE)?;
        self.conn.execute_batch(CREATE_BASE_WAREHOUSE_INDEX)?;
        self.conn.execute_batch(CREATE_LOCKS)?;

        self.verify_or_set_version()
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM inventory_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO inventory_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v.parse::<i32>().ok() == Some(SCHEMA_VERSION) => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the wrapper and returns the connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
