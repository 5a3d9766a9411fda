//! # Domain Types for the Inventory Journal
//!
//! Value types shared by every component:
//!
//! - [`InventoryKey`]: the (sku code, warehouse) partition and lock unit
//! - [`JournalId`], [`JournalEntry`]: one immutable signed delta
//! - [`Rollup`]: the sum of a bounded set of deltas
//! - [`BaseInventory`]: the compacted absolute counts for a key
//! - [`InventoryLevel`], [`LowStockInfo`]: read-side views
//! - [`Lease`]: proof of holding a compaction lock
//!
//! ## Rust Pattern: Newtypes
//!
//! `JournalId` wraps an `i64` so a journal id can never be confused with a
//! quantity or a warehouse id at a call site.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Inventory Key
// =============================================================================

/// Identity of one stock record: a sku code stocked in one warehouse.
///
/// Used as the partition unit for journal rows and as the lock unit for
/// compaction. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub sku_code: String,
    pub warehouse_id: i64,
}

impl InventoryKey {
    pub fn new(sku_code: impl Into<String>, warehouse_id: i64) -> Self {
        Self {
            sku_code: sku_code.into(),
            warehouse_id,
        }
    }

    /// Rejects keys that can never name a stock record.
    pub fn validate(&self) -> Result<()> {
        if self.sku_code.trim().is_empty() {
            return Err(Error::InvalidKey(format!(
                "empty sku code in warehouse {}",
                self.warehouse_id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sku_code, self.warehouse_id)
    }
}

impl From<(&str, i64)> for InventoryKey {
    fn from((sku_code, warehouse_id): (&str, i64)) -> Self {
        Self::new(sku_code, warehouse_id)
    }
}

// =============================================================================
// Journal
// =============================================================================

/// Identifier of a journal row.
///
/// # Invariants
///
/// - Strictly increases with each append
/// - Never reused, even after the row is compacted away
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JournalId(i64);

impl JournalId {
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One signed quantity change for a key. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalId,
    pub key: InventoryKey,
    pub quantity_on_hand_delta: i64,
    pub allocated_quantity_delta: i64,
    pub created_ms: u64,
}

// =============================================================================
// Rollup
// =============================================================================

/// The sum of a specific, bounded set of journal rows.
///
/// A rollup is transient: it exists between the SUMMING and FOLDING steps
/// of a compaction pass, and inside a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollup {
    pub quantity_on_hand_delta: i64,
    pub allocated_quantity_delta: i64,
}

impl Rollup {
    pub const ZERO: Rollup = Rollup {
        quantity_on_hand_delta: 0,
        allocated_quantity_delta: 0,
    };

    pub fn new(quantity_on_hand_delta: i64, allocated_quantity_delta: i64) -> Self {
        Self {
            quantity_on_hand_delta,
            allocated_quantity_delta,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Adds two rollups, or `None` if either component overflows.
    pub fn checked_add(self, other: Rollup) -> Option<Rollup> {
        Some(Rollup {
            quantity_on_hand_delta: self
                .quantity_on_hand_delta
                .checked_add(other.quantity_on_hand_delta)?,
            allocated_quantity_delta: self
                .allocated_quantity_delta
                .checked_add(other.allocated_quantity_delta)?,
        })
    }
}

// =============================================================================
// Base Inventory
// =============================================================================

/// The last-compacted absolute counts for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseInventory {
    pub key: InventoryKey,
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
    pub reorder_minimum: i64,
    pub last_modified_ms: u64,
}

// =============================================================================
// Read-Side Views
// =============================================================================

/// Current counts for a key: base row plus every uncompacted delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub key: InventoryKey,
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
}

impl InventoryLevel {
    /// Combines a (possibly missing) base row with a journal rollup.
    ///
    /// A missing base row counts as zero on hand, zero allocated.
    pub fn from_parts(key: InventoryKey, base: Option<&BaseInventory>, pending: Rollup) -> Result<Self> {
        let (on_hand, allocated) = base
            .map(|b| (b.quantity_on_hand, b.allocated_quantity))
            .unwrap_or((0, 0));

        let overflow = || Error::QuantityOverflow(key.to_string());
        let quantity_on_hand = on_hand
            .checked_add(pending.quantity_on_hand_delta)
            .ok_or_else(overflow)?;
        let allocated_quantity = allocated
            .checked_add(pending.allocated_quantity_delta)
            .ok_or_else(overflow)?;

        Ok(Self {
            key,
            quantity_on_hand,
            allocated_quantity,
        })
    }

    /// On-hand stock not yet promised to an order.
    ///
    /// Negative when the warehouse is oversold; zero is not a floor. The
    /// subtraction saturates at the `i64` bounds.
    pub fn available(&self) -> i64 {
        self.quantity_on_hand.saturating_sub(self.allocated_quantity)
    }
}

/// A key reported by the low-stock scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockInfo {
    pub key: InventoryKey,
    pub quantity_on_hand: i64,
    pub allocated_quantity: i64,
    /// `None` when the key has journal rows but no base row yet.
    pub reorder_minimum: Option<i64>,
}

impl LowStockInfo {
    /// Same as [`InventoryLevel::available`]: may be negative, saturates
    /// at the `i64` bounds.
    pub fn available(&self) -> i64 {
        self.quantity_on_hand.saturating_sub(self.allocated_quantity)
    }
}

// =============================================================================
// Compaction Lease
// =============================================================================

/// Proof that a compactor holds the lock for one key.
///
/// `holder` is unique per acquisition. `fence` increases with every
/// acquisition of the same key, so a compactor whose lease expired can be
/// told apart from the one that took over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub fence: i64,
    pub expires_ms: u64,
}

// =============================================================================
// Time
// =============================================================================

/// Milliseconds since the Unix epoch.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================
