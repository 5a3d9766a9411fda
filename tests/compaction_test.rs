mod common;

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use inventory_journal::{
    txn, BaseRepository, CompactionOutcome, CompactionState, Compactor, CompactorConfig, Error,
    InventoryKey, InventoryReader, InventoryWriter, JournalEntry, JournalId, JournalRepository,
    LockRepository, Result, Rollup, RollupCalculator, SqliteBase, SqliteJournal, SqliteLocks,
};
use rusqlite::Connection;

/// Journal that parks the compactor in SUMMING, lock held, until released.
struct GatedJournal {
    entered: Arc<Barrier>,
    resume: Arc<Barrier>,
}

impl JournalRepository for GatedJournal {
    fn append(&self, conn: &Connection, key: &InventoryKey, on_hand: i64, allocated: i64) -> Result<JournalEntry> {
        SqliteJournal.append(conn, key, on_hand, allocated)
    }

    fn snapshot_ids(&self, conn: &Connection, key: &InventoryKey, limit: Option<usize>) -> Result<Vec<JournalId>> {
        SqliteJournal.snapshot_ids(conn, key, limit)
    }

    fn sum(&self, conn: &Connection, ids: &[JournalId]) -> Result<Rollup> {
        self.entered.wait();
        self.resume.wait();
        SqliteJournal.sum(conn, ids)
    }

    fn delete_all(&self, conn: &Connection, ids: &[JournalId]) -> Result<usize> {
        SqliteJournal.delete_all(conn, ids)
    }

    fn keys_with_entries(&self, conn: &Connection, min_entries: usize) -> Result<Vec<InventoryKey>> {
        SqliteJournal.keys_with_entries(conn, min_entries)
    }

    fn rollups_for_keys(&self, conn: &Connection, keys: &[InventoryKey]) -> Result<HashMap<InventoryKey, Rollup>> {
        SqliteJournal.rollups_for_keys(conn, keys)
    }

    fn rollups_for_sku(&self, conn: &Connection, sku_code: &str) -> Result<HashMap<i64, Rollup>> {
        SqliteJournal.rollups_for_sku(conn, sku_code)
    }

    fn remove_by_key(&self, conn: &Connection, key: &InventoryKey) -> Result<usize> {
        SqliteJournal.remove_by_key(conn, key)
    }
}

/// 100 on hand, then -3, -5, +2: reads 94 before and after compaction.
#[test]
fn compaction_preserves_quantity_and_empties_journal() {
    let (_dir, path) = common::create_temp_db_file("compaction.db");
    let conn = common::open_read_write(&path);
    let writer = InventoryWriter::default();
    let reader = InventoryReader::default();
    let key = InventoryKey::new("SKU1", 10);

    writer.register(&conn, &key, 100, 0).unwrap();
    for delta in [-3, -5, 2] {
        writer.adjust(&conn, &key, delta, 0).unwrap();
    }
    assert_eq!(reader.get_quantity(&conn, &key).unwrap().quantity_on_hand, 94);

    let outcome = Compactor::default().compact(&conn, &key).unwrap();
    assert_eq!(outcome.final_state(), CompactionState::Done);

    let base = SqliteBase.get(&conn, &key).unwrap().unwrap();
    assert_eq!(base.quantity_on_hand, 94);
    assert_eq!(common::pending_rows(&conn, &key), 0);
    assert_eq!(reader.get_quantity(&conn, &key).unwrap().quantity_on_hand, 94);
}

/// A second pass with no new rows changes nothing.
#[test]
fn repeated_compaction_is_idempotent() {
    let (_dir, path) = common::create_temp_db_file("idempotent.db");
    let conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);
    let compactor = Compactor::default();

    InventoryWriter::default().adjust(&conn, &key, 12, 4).unwrap();
    compactor.compact(&conn, &key).unwrap();
    let after_first = SqliteBase.get(&conn, &key).unwrap();

    assert_eq!(compactor.compact(&conn, &key).unwrap(), CompactionOutcome::Empty);
    assert_eq!(SqliteBase.get(&conn, &key).unwrap(), after_first);
}

/// Two compactors race on one key: at most one folds, the base never
/// double-counts.
#[test]
fn concurrent_compactors_on_same_key_fold_once() {
    let (_dir, path) = common::create_temp_db_file("race.db");
    let key = InventoryKey::new("SKU1", 10);
    {
        let conn = common::open_read_write(&path);
        let writer = InventoryWriter::default();
        writer.register(&conn, &key, 100, 0).unwrap();
        for _ in 0..50 {
            writer.adjust(&conn, &key, -1, 0).unwrap();
        }
    }

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let key = key.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = common::open_read_write(&path);
                barrier.wait();
                Compactor::default().compact(&conn, &key).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<CompactionOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let folded = outcomes
        .iter()
        .filter(|o| matches!(o, CompactionOutcome::Folded { entries: 50, .. }))
        .count();
    assert_eq!(folded, 1, "exactly one compactor folds: {outcomes:?}");
    // The other one either lost the lock race or ran after the fold.
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, CompactionOutcome::Skipped | CompactionOutcome::Empty)));

    let conn = common::open_read_write(&path);
    assert_eq!(SqliteBase.get(&conn, &key).unwrap().unwrap().quantity_on_hand, 50);
    assert_eq!(common::pending_rows(&conn, &key), 0);
}

/// A second compactor arriving while the first is mid-pass skips the key
/// and leaves base and journal untouched; the first then folds everything.
#[test]
fn compactor_arriving_mid_pass_is_skipped() {
    let (_dir, path) = common::create_temp_db_file("mid_pass.db");
    let key = InventoryKey::new("SKU1", 10);
    let conn = common::open_read_write(&path);
    let writer = InventoryWriter::default();
    writer.register(&conn, &key, 100, 0).unwrap();
    for _ in 0..50 {
        writer.adjust(&conn, &key, -1, 0).unwrap();
    }

    let entered = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));
    let first = {
        let path = path.clone();
        let key = key.clone();
        let journal = GatedJournal {
            entered: Arc::clone(&entered),
            resume: Arc::clone(&resume),
        };
        thread::spawn(move || {
            let conn = common::open_read_write(&path);
            Compactor::new(journal, SqliteBase, SqliteLocks, CompactorConfig::default())
                .compact(&conn, &key)
                .unwrap()
        })
    };

    // First compactor now holds the lock and is summing.
    entered.wait();
    let second = Compactor::default().compact(&conn, &key).unwrap();
    assert_eq!(second, CompactionOutcome::Skipped);
    assert_eq!(second.final_state(), CompactionState::Skipped);
    assert_eq!(SqliteBase.get(&conn, &key).unwrap().unwrap().quantity_on_hand, 100);
    assert_eq!(common::pending_rows(&conn, &key), 50);
    resume.wait();

    let outcome = first.join().unwrap();
    assert!(matches!(outcome, CompactionOutcome::Folded { entries: 50, .. }), "{outcome:?}");
    assert_eq!(SqliteBase.get(&conn, &key).unwrap().unwrap().quantity_on_hand, 50);
    assert_eq!(common::pending_rows(&conn, &key), 0);
}

/// While another holder owns the lock, a pass is skipped with no side effects.
#[test]
fn held_lock_skips_without_side_effects() {
    let (_dir, path) = common::create_temp_db_file("skip.db");
    let holder_conn = common::open_read_write(&path);
    let conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);

    InventoryWriter::default().adjust(&conn, &key, 5, 0).unwrap();
    let lease = SqliteLocks
        .try_acquire(&holder_conn, &key, "other-compactor", Duration::from_secs(60))
        .unwrap()
        .expect("first acquire succeeds");

    assert!(SqliteLocks
        .try_acquire(&conn, &key, "second", Duration::from_secs(60))
        .unwrap()
        .is_none());
    assert_eq!(Compactor::default().compact(&conn, &key).unwrap(), CompactionOutcome::Skipped);
    assert!(SqliteBase.get(&conn, &key).unwrap().is_none());
    assert_eq!(common::pending_rows(&conn, &key), 1);

    SqliteLocks.release(&holder_conn, &key, &lease).unwrap();
    assert!(matches!(
        Compactor::default().compact(&conn, &key).unwrap(),
        CompactionOutcome::Folded { entries: 1, .. }
    ));
}

/// Compactors on different keys proceed in parallel.
#[test]
fn different_keys_compact_in_parallel() {
    let (_dir, path) = common::create_temp_db_file("parallel.db");
    let keys: Vec<InventoryKey> = (0..4).map(|i| InventoryKey::new(format!("SKU{i}"), 1)).collect();
    {
        let conn = common::open_read_write(&path);
        for key in &keys {
            for _ in 0..20 {
                InventoryWriter::default().adjust(&conn, key, 1, 0).unwrap();
            }
        }
        // Holding one key's lock must not block the others.
        SqliteLocks
            .try_acquire(&conn, &keys[0], "long-running", Duration::from_secs(60))
            .unwrap()
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(keys.len() - 1));
    let handles: Vec<_> = keys[1..]
        .iter()
        .cloned()
        .map(|key| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = common::open_read_write(&path);
                barrier.wait();
                Compactor::default().compact(&conn, &key).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(
            handle.join().unwrap(),
            CompactionOutcome::Folded { entries: 20, .. }
        ));
    }

    let conn = common::open_read_write(&path);
    assert_eq!(common::pending_rows(&conn, &keys[0]), 20);
    for key in &keys[1..] {
        assert_eq!(SqliteBase.get(&conn, key).unwrap().unwrap().quantity_on_hand, 20);
    }
}

/// A reader whose snapshot predates a fold sees the pre-fold state for
/// both base and journal, so its total is unchanged.
#[test]
fn read_snapshot_straddling_a_fold_is_consistent() {
    let (_dir, path) = common::create_temp_db_file("straddle.db");
    let reader_conn = common::open_read_write(&path);
    let compactor_conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);

    let writer = InventoryWriter::default();
    writer.register(&compactor_conn, &key, 100, 0).unwrap();
    for delta in [-3, -5, 2] {
        writer.adjust(&compactor_conn, &key, delta, 0).unwrap();
    }

    let total = txn::read_snapshot(&reader_conn, |conn| {
        let base = SqliteBase.get(conn, &key)?.unwrap();

        // Fold commits on another connection between the two reads.
        let outcome = Compactor::default().compact(&compactor_conn, &key)?;
        assert!(matches!(outcome, CompactionOutcome::Folded { entries: 3, .. }));

        let ids = SqliteJournal.snapshot_ids(conn, &key, None)?;
        let pending = RollupCalculator::default().calculate(&SqliteJournal, conn, &key, &ids)?;
        Ok(base.quantity_on_hand + pending.quantity_on_hand_delta)
    })
    .unwrap();
    assert_eq!(total, 94);

    // A fresh snapshot sees the folded state.
    assert_eq!(SqliteBase.get(&reader_conn, &key).unwrap().unwrap().quantity_on_hand, 94);
    assert_eq!(common::pending_rows(&reader_conn, &key), 0);
}

/// Rows appended after the snapshot survive the pass and are folded next time.
#[test]
fn rows_appended_after_snapshot_are_left_for_next_cycle() {
    let (_dir, path) = common::create_temp_db_file("late_rows.db");
    let conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);

    let first = SqliteJournal.append(&conn, &key, 10, 0).unwrap();
    let lease = SqliteLocks
        .try_acquire(&conn, &key, "manual", Duration::from_secs(60))
        .unwrap()
        .unwrap();
    let ids = SqliteJournal.snapshot_ids(&conn, &key, None).unwrap();
    assert_eq!(ids, vec![first.id]);

    let late = SqliteJournal.append(&conn, &key, 7, 0).unwrap();

    let rollup = SqliteJournal.sum(&conn, &ids).unwrap();
    txn::immediate(&conn, |c| {
        SqliteLocks.verify(c, &key, &lease)?;
        SqliteBase.fold(c, &key, &rollup)?;
        SqliteJournal.delete_all(c, &ids)?;
        Ok(())
    })
    .unwrap();
    SqliteLocks.release(&conn, &key, &lease).unwrap();

    assert_eq!(SqliteJournal.snapshot_ids(&conn, &key, None).unwrap(), vec![late.id]);
    assert_eq!(
        InventoryReader::default().get_quantity(&conn, &key).unwrap().quantity_on_hand,
        17
    );
}

/// A compactor whose lease expired and was taken over cannot commit its fold.
#[test]
fn stale_compactor_is_fenced_off() {
    let (_dir, path) = common::create_temp_db_file("fencing.db");
    let slow_conn = common::open_read_write(&path);
    let fast_conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);

    SqliteJournal.append(&slow_conn, &key, 4, 0).unwrap();
    SqliteJournal.append(&slow_conn, &key, 6, 0).unwrap();

    // The slow compactor gets through SNAPSHOT and SUMMING, then stalls
    // past its lease.
    let stale = SqliteLocks
        .try_acquire(&slow_conn, &key, "slow", Duration::ZERO)
        .unwrap()
        .unwrap();
    let ids = SqliteJournal.snapshot_ids(&slow_conn, &key, None).unwrap();
    let rollup = SqliteJournal.sum(&slow_conn, &ids).unwrap();
    assert_eq!(rollup, Rollup::new(10, 0));

    // Another compactor takes over the expired lease and folds.
    assert!(matches!(
        Compactor::default().compact(&fast_conn, &key).unwrap(),
        CompactionOutcome::Folded { entries: 2, .. }
    ));

    // The stale fold must roll back entirely.
    let err = txn::immediate(&slow_conn, |c| {
        SqliteLocks.verify(c, &key, &stale)?;
        SqliteBase.fold(c, &key, &rollup)?;
        SqliteJournal.delete_all(c, &ids)?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, Error::LeaseLost { .. }));

    assert_eq!(SqliteBase.get(&slow_conn, &key).unwrap().unwrap().quantity_on_hand, 10);
}

/// Removing a sku mid-pass makes the pass fail cleanly.
#[test]
fn removal_during_pass_aborts_fold() {
    let (_dir, path) = common::create_temp_db_file("removal.db");
    let conn = common::open_read_write(&path);
    let key = InventoryKey::new("SKU1", 10);
    let writer = InventoryWriter::default();

    writer.register(&conn, &key, 10, 0).unwrap();
    writer.adjust(&conn, &key, 5, 0).unwrap();

    let lease = SqliteLocks
        .try_acquire(&conn, &key, "mid-pass", Duration::from_secs(60))
        .unwrap()
        .unwrap();
    let ids = SqliteJournal.snapshot_ids(&conn, &key, None).unwrap();
    let rollup = SqliteJournal.sum(&conn, &ids).unwrap();

    assert!(writer.remove(&conn, &key).unwrap());

    let err = txn::immediate(&conn, |c| {
        SqliteLocks.verify(c, &key, &lease)?;
        SqliteBase.fold(c, &key, &rollup)?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, Error::LeaseLost { .. }));
    assert!(SqliteBase.get(&conn, &key).unwrap().is_none());
    assert_eq!(common::table_count(&conn, "compaction_locks"), 0);
}
