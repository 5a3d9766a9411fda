//! Rollup calculation: turns a snapshot of journal ids into one delta pair.

use rusqlite::Connection;
use tracing::trace;

use crate::error::{Error, Result};
use crate::journal::{JournalRepository, MAX_IDS_PER_STATEMENT};
use crate::types::{InventoryKey, JournalId, Rollup};

/// Sums a journal snapshot, chunk by chunk, with overflow checking.
#[derive(Debug, Clone, Copy)]
pub struct RollupCalculator {
    chunk_size: usize,
}

impl Default for RollupCalculator {
    fn default() -> Self {
        Self {
            chunk_size: MAX_IDS_PER_STATEMENT,
        }
    }
}

impl RollupCalculator {
    /// A calculator issuing at most `chunk_size` ids per statement.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_IDS_PER_STATEMENT),
        }
    }

    /// Sums exactly `ids`.
    ///
    /// Run inside a read snapshot when the result is combined with other
    /// reads; the compactor relies on row immutability instead.
    pub fn calculate<J: JournalRepository>(
        &self,
        journal: &J,
        conn: &Connection,
        key: &InventoryKey,
        ids: &[JournalId],
    ) -> Result<Rollup> {
        let mut total = Rollup::ZERO;
        for chunk in ids.chunks(self.chunk_size) {
            let part = journal.sum(conn, chunk)?;
            total = total
                .checked_add(part)
                .ok_or_else(|| Error::QuantityOverflow(key.to_string()))?;
        }

        trace!(%key, entries = ids.len(), ?total, "rollup calculated");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::SqliteJournal;
    use crate::schema::Database;

    #[test]
    fn test_chunked_sum_matches_single_sum() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let key = InventoryKey::new("SKU1", 10);

        for delta in [3, -29, 2, -23, 7] {
            SqliteJournal.append(conn, &key, delta, -delta).unwrap();
        }
        let ids = SqliteJournal.snapshot_ids(conn, &key, None).unwrap();

        let chunked = RollupCalculator::with_chunk_size(2)
            .calculate(&SqliteJournal, conn, &key, &ids)
            .unwrap();
        assert_eq!(chunked, Rollup::new(-40, 40));
        assert_eq!(chunked, SqliteJournal.sum(conn, &ids).unwrap());
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let db = Database::open_in_memory().unwrap();
        let rollup = RollupCalculator::default()
            .calculate(&SqliteJournal, db.connection(), &InventoryKey::new("X", 1), &[])
            .unwrap();
        assert!(rollup.is_zero());
    }

    #[test]
    fn test_overflow_across_chunks_is_reported() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let key = InventoryKey::new("SKU1", 10);

        SqliteJournal.append(conn, &key, i64::MAX, 0).unwrap();
        SqliteJournal.append(conn, &key, 1, 0).unwrap();
        let ids = SqliteJournal.snapshot_ids(conn, &key, None).unwrap();

        let err = RollupCalculator::with_chunk_size(1)
            .calculate(&SqliteJournal, conn, &key, &ids)
            .unwrap_err();
        assert!(matches!(err, Error::QuantityOverflow(_)));
    }
}
