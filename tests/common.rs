#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use inventory_journal::schema::open_connection;
use inventory_journal::{Database, EngineConfig, InventoryKey, JournalRepository, SqliteJournal};
use rusqlite::Connection;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_write(path: &Path) -> Connection {
    open_connection(path, BUSY_TIMEOUT).expect("open read-write connection")
}

pub fn pending_rows(conn: &Connection, key: &InventoryKey) -> usize {
    SqliteJournal
        .snapshot_ids(conn, key, None)
        .expect("snapshot journal ids")
        .len()
}

pub fn table_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

pub fn engine_config(worker_threads: usize) -> EngineConfig {
    EngineConfig {
        worker_threads,
        compaction_interval: None,
        busy_timeout: BUSY_TIMEOUT,
        ..EngineConfig::default()
    }
}
