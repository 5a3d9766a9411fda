mod common;

use std::time::Duration;

use inventory_journal::{
    CompactionOutcome, Compactor, Database, InventoryKey, InventoryReader, InventoryWriter,
    LockRepository, SqliteLocks,
};

/// Quantities and pending journal rows survive closing and reopening.
#[test]
fn restart_preserves_base_and_journal() {
    let (_dir, path) = common::create_temp_db_file("restart.db");
    let key = InventoryKey::new("SKU1", 3);

    {
        let db = Database::open(&path).unwrap();
        let conn = db.connection();
        let writer = InventoryWriter::default();
        writer.register(conn, &key, 40, 5).unwrap();
        writer.allocate(conn, &key, 6).unwrap();
        Compactor::default().compact(conn, &key).unwrap();
        writer.release(conn, &key, 2).unwrap();
    }

    // Simulates a process restart.
    let db = Database::open(&path).unwrap();
    let conn = db.connection();
    let level = InventoryReader::default().get_quantity(conn, &key).unwrap();
    assert_eq!(level.quantity_on_hand, 38);
    assert_eq!(level.allocated_quantity, 4);
    assert_eq!(common::pending_rows(conn, &key), 1);
}

/// A compactor that died holding a lock blocks its key only until the
/// lease runs out.
#[test]
fn orphaned_lock_expires_after_restart() {
    let (_dir, path) = common::create_temp_db_file("orphan.db");
    let key = InventoryKey::new("SKU1", 3);

    {
        let conn = common::open_read_write(&path);
        InventoryWriter::default().adjust(&conn, &key, 9, 0).unwrap();
        // Acquired and never released: the process "crashes" here.
        SqliteLocks
            .try_acquire(&conn, &key, "crashed", Duration::from_millis(50))
            .unwrap()
            .unwrap();
    }

    let conn = common::open_read_write(&path);
    assert_eq!(Compactor::default().compact(&conn, &key).unwrap(), CompactionOutcome::Skipped);

    std::thread::sleep(Duration::from_millis(80));

    assert!(matches!(
        Compactor::default().compact(&conn, &key).unwrap(),
        CompactionOutcome::Folded { entries: 1, .. }
    ));
    assert_eq!(
        InventoryReader::default().get_quantity(&conn, &key).unwrap().quantity_on_hand,
        9
    );
}

/// Journal ids keep increasing across restarts, even after compaction
/// deleted every row.
#[test]
fn journal_ids_are_never_reused() {
    let (_dir, path) = common::create_temp_db_file("ids.db");
    let key = InventoryKey::new("SKU1", 3);

    let last_before = {
        let conn = common::open_read_write(&path);
        let writer = InventoryWriter::default();
        writer.adjust(&conn, &key, 1, 0).unwrap();
        let last = writer.adjust(&conn, &key, 1, 0).unwrap();
        Compactor::default().compact(&conn, &key).unwrap();
        last.id
    };

    let conn = common::open_read_write(&path);
    let next = InventoryWriter::default().adjust(&conn, &key, 1, 0).unwrap();
    assert!(next.id > last_before);
}
