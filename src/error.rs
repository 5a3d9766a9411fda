//! # Error Handling for the Inventory Journal
//!
//! A single error enum ([`Error`]) covers every failure mode of the engine:
//! the journal, the base store, the compaction locks, and the async facade.
//!
//! ## Rust Pattern: thiserror
//!
//! `thiserror` derives `Display` from the `#[error(...)]` attributes and
//! `From` from the `#[from]` attributes, so `?` converts `rusqlite` errors
//! into [`Error::Storage`] automatically.
//!
//! ## Error Categories
//!
//! | Category   | Examples                          | Typical Response               |
//! |------------|-----------------------------------|--------------------------------|
//! | Caller     | Empty sku code, negative quantity | Fix the request                |
//! | Storage    | SQLite busy, disk full            | Surface to caller, maybe retry |
//! | Fencing    | Lease taken over during a fold    | Abandon pass, next cycle folds |
//! | Lifecycle  | Engine already shut down          | Reopen                         |
//!
//! Lock contention is deliberately *not* an error: a compactor that cannot
//! get the per-key lock reports `CompactionOutcome::Skipped`.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in inventory journal operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Errors
    // =========================================================================

    /// An inventory key with an empty sku code was supplied.
    #[error("invalid inventory key: {0}")]
    InvalidKey(String),

    /// A lifecycle command was given a quantity outside its accepted range.
    ///
    /// `allocate` and `deallocate` accept zero or more; `release` needs a
    /// strictly positive quantity.
    #[error("invalid quantity {quantity} for {operation}")]
    InvalidQuantity {
        /// The command that rejected the quantity
        operation: &'static str,
        /// The offending quantity
        quantity: i64,
    },

    /// Summing deltas overflowed a 64-bit quantity.
    #[error("quantity overflow while summing deltas for {0}")]
    QuantityOverflow(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// The backing store failed.
    ///
    /// # Rust Pattern: #[from]
    ///
    /// Wraps any `rusqlite::Error`: a busy database past the busy timeout,
    /// a full disk, a corrupted file. Appends are never retried internally;
    /// the caller decides.
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Schema version mismatch or a corrupt row.
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Compaction Fencing
    // =========================================================================

    /// The compaction lease for a key was lost before the fold committed.
    ///
    /// # Systems Concept: Fencing Tokens
    ///
    /// Every successful acquisition bumps the lock row's fence. The fold
    /// transaction re-reads the fence and aborts if another compactor took
    /// over after our lease expired, or if the key was removed.
    #[error("compaction lease lost for {key}: fence {fence} is no longer current")]
    LeaseLost {
        /// Display form of the inventory key
        key: String,
        /// The fence this compactor held
        fence: i64,
    },

    /// Journal rows named by a snapshot vanished before the fold.
    #[error("journal snapshot for {key} changed: expected {expected} rows, deleted {deleted}")]
    SnapshotChanged {
        /// Display form of the inventory key
        key: String,
        /// Ids in the snapshot
        expected: usize,
        /// Rows actually deleted
        deleted: usize,
    },

    // =========================================================================
    // Configuration and Lifecycle
    // =========================================================================

    /// A configuration value could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine's worker pool is gone.
    #[error("engine closed: {0}")]
    Closed(String),
}

impl Error {
    /// True for failures of the backing store itself.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let invalid = Error::InvalidQuantity {
            operation: "release",
            quantity: 0,
        };
        assert_eq!(invalid.to_string(), "invalid quantity 0 for release");

        let lost = Error::LeaseLost {
            key: "SKU1@10".to_string(),
            fence: 4,
        };
        assert_eq!(
            lost.to_string(),
            "compaction lease lost for SKU1@10: fence 4 is no longer current"
        );

        let changed = Error::SnapshotChanged {
            key: "SKU1@10".to_string(),
            expected: 3,
            deleted: 2,
        };
        assert_eq!(
            changed.to_string(),
            "journal snapshot for SKU1@10 changed: expected 3 rows, deleted 2"
        );
    }

    /// `?` turns rusqlite errors into storage failures.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Storage(_)));
        assert!(our_err.is_storage_failure());
        assert!(our_err.to_string().contains("storage failure"));
        assert!(!Error::Config("x".to_string()).is_storage_failure());
    }
}
