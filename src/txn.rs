//! Transaction demarcation.
//!
//! Both helpers use raw `BEGIN`/`COMMIT`/`ROLLBACK` on a shared `&Connection`
//! rather than `rusqlite::Transaction`, which needs `&mut Connection`. If
//! the connection is already inside a transaction the closure simply joins
//! it; the outermost caller owns commit and rollback.

use rusqlite::Connection;

use crate::error::Result;

/// Runs `f` inside a `BEGIN IMMEDIATE` write transaction.
///
/// IMMEDIATE takes the write lock up front, so the transaction never has to
/// upgrade from a read snapshot halfway through (which fails with
/// `SQLITE_BUSY` instead of waiting).
pub fn immediate<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    scoped(conn, "BEGIN IMMEDIATE", f)
}

/// Runs `f` inside a deferred read transaction.
///
/// In WAL mode every statement in the closure observes the same snapshot.
pub fn read_snapshot<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    scoped(conn, "BEGIN DEFERRED", f)
}

fn scoped<T>(
    conn: &Connection,
    begin: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }

    conn.execute_batch(begin)?;
    match f(conn) {
        Ok(value) => match conn.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e.into())
            }
        },
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}
