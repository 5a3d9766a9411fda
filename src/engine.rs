//! # Async API for the Inventory Journal
//!
//! [`InventoryEngine`] is the async entry point. It wraps the synchronous
//! components (writer, reader, compactor, low-stock scanner) behind Tokio
//! channels.
//!
//! ## The SQLite Challenge
//!
//! `rusqlite::Connection` is `!Sync`, so it cannot be shared between tasks.
//! Each worker is a dedicated OS thread that owns one connection:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tokio Runtime                            │
//! │  task1 ─┐                                                   │
//! │  task2 ─┼── tokio::sync::mpsc ──┐     background sweep task │
//! │  task3 ─┘     (async send)      │     (tokio::time::interval)│
//! └─────────────────────────────────┼───────────────────────────┘
//!                                   ▼
//!        ┌────────────┐  ┌────────────┐       ┌────────────┐
//!        │ worker 0   │  │ worker 1   │  ...  │ worker N   │
//!        │ Connection │  │ Connection │       │ Connection │
//!        └─────┬──────┘  └─────┬──────┘       └─────┬──────┘
//!              └───────────────┴──────┬─────────────┘
//!                                     ▼
//!                              SQLite (WAL)
//! ```
//!
//! Workers compete for requests on one shared receiver. Any worker may
//! append, read or compact; isolation comes from SQLite (WAL snapshots,
//! IMMEDIATE fold transactions) and the per-key compaction lock rows,
//! never from an in-process mutex around inventory state.
//!
//! ## Parallel Sweeps
//!
//! [`InventoryEngine::compact_pending`] lists the pending keys, then sends
//! one compaction request per key and awaits them together with
//! `futures::future::join_all`. Different keys fold on different workers
//! at the same time; two requests for the same key resolve to one `Folded`
//! and one `Skipped`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::future::join_all;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, trace};

use crate::compactor::{CompactionOutcome, CompactionStats, Compactor};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::low_stock::LowStockScanner;
use crate::reader::InventoryReader;
use crate::schema::{self, Database};
use crate::types::{InventoryKey, InventoryLevel, JournalEntry, LowStockInfo};
use crate::writer::InventoryWriter;

// =============================================================================
// Configuration
// =============================================================================

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 4096;

// =============================================================================
// Request Types
// =============================================================================

/// A quantity change submitted through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockCommand {
    Adjust { on_hand_delta: i64, allocated_delta: i64 },
    AdjustOnHand(i64),
    Allocate(i64),
    Deallocate(i64),
    Release(i64),
}

/// Request type for worker threads.
pub enum EngineRequest {
    Command {
        key: InventoryKey,
        command: StockCommand,
        response: oneshot::Sender<Result<JournalEntry>>,
    },
    Register {
        key: InventoryKey,
        initial_on_hand: i64,
        reorder_minimum: i64,
        response: oneshot::Sender<Result<bool>>,
    },
    SetReorderMinimum {
        key: InventoryKey,
        minimum: i64,
        response: oneshot::Sender<Result<bool>>,
    },
    Remove {
        key: InventoryKey,
        response: oneshot::Sender<Result<bool>>,
    },
    GetQuantity {
        key: InventoryKey,
        response: oneshot::Sender<Result<InventoryLevel>>,
    },
    GetInventoryMap {
        keys: Vec<InventoryKey>,
        response: oneshot::Sender<Result<HashMap<InventoryKey, InventoryLevel>>>,
    },
    GetInventoriesForSku {
        sku_code: String,
        response: oneshot::Sender<Result<HashMap<i64, InventoryLevel>>>,
    },
    FindLowStock {
        sku_codes: Vec<String>,
        warehouse_id: i64,
        threshold: i64,
        response: oneshot::Sender<Result<Vec<LowStockInfo>>>,
    },
    FindBelowReorderMinimum {
        sku_codes: Vec<String>,
        warehouse_id: i64,
        response: oneshot::Sender<Result<Vec<LowStockInfo>>>,
    },
    Compact {
        key: InventoryKey,
        response: oneshot::Sender<Result<CompactionOutcome>>,
    },
    PendingKeys {
        min_entries: usize,
        response: oneshot::Sender<Result<Vec<InventoryKey>>>,
    },
    /// Stop the worker that receives it.
    Shutdown,
}

// =============================================================================
// Worker
// =============================================================================

/// The components one worker thread runs against its own connection.
struct Worker {
    conn: Connection,
    writer: InventoryWriter,
    reader: InventoryReader,
    compactor: Compactor,
    scanner: LowStockScanner,
}

impl Worker {
    fn new(conn: Connection, config: &EngineConfig) -> Self {
        Self {
            conn,
            writer: InventoryWriter::default(),
            reader: InventoryReader::default(),
            compactor: Compactor::with_config(config.compactor()),
            scanner: LowStockScanner,
        }
    }

    fn execute(&self, command: StockCommand, key: &InventoryKey) -> Result<JournalEntry> {
        let conn = &self.conn;
        match command {
            StockCommand::Adjust {
                on_hand_delta,
                allocated_delta,
            } => self.writer.adjust(conn, key, on_hand_delta, allocated_delta),
            StockCommand::AdjustOnHand(quantity) => self.writer.adjust_on_hand(conn, key, quantity),
            StockCommand::Allocate(quantity) => self.writer.allocate(conn, key, quantity),
            StockCommand::Deallocate(quantity) => self.writer.deallocate(conn, key, quantity),
            StockCommand::Release(quantity) => self.writer.release(conn, key, quantity),
        }
    }

    /// Handles one request. Returns false when the worker should stop.
    fn handle(&self, request: EngineRequest) -> bool {
        let conn = &self.conn;
        match request {
            EngineRequest::Command {
                key,
                command,
                response,
            } => {
                let _ = response.send(self.execute(command, &key));
            }
            EngineRequest::Register {
                key,
                initial_on_hand,
                reorder_minimum,
                response,
            } => {
                let _ = response.send(self.writer.register(conn, &key, initial_on_hand, reorder_minimum));
            }
            EngineRequest::SetReorderMinimum {
                key,
                minimum,
                response,
            } => {
                let _ = response.send(self.writer.set_reorder_minimum(conn, &key, minimum));
            }
            EngineRequest::Remove { key, response } => {
                let _ = response.send(self.writer.remove(conn, &key));
            }
            EngineRequest::GetQuantity { key, response } => {
                let _ = response.send(self.reader.get_quantity(conn, &key));
            }
            EngineRequest::GetInventoryMap { keys, response } => {
                let _ = response.send(self.reader.get_inventory_map(conn, &keys));
            }
            EngineRequest::GetInventoriesForSku { sku_code, response } => {
                let _ = response.send(self.reader.get_inventories_for_sku(conn, &sku_code));
            }
            EngineRequest::FindLowStock {
                sku_codes,
                warehouse_id,
                threshold,
                response,
            } => {
                let _ = response.send(self.scanner.find_low_stock(conn, &sku_codes, warehouse_id, threshold));
            }
            EngineRequest::FindBelowReorderMinimum {
                sku_codes,
                warehouse_id,
                response,
            } => {
                let _ = response.send(self.scanner.find_below_reorder_minimum(conn, &sku_codes, warehouse_id));
            }
            EngineRequest::Compact { key, response } => {
                let _ = response.send(self.compactor.compact(conn, &key));
            }
            EngineRequest::PendingKeys { min_entries, response } => {
                let _ = response.send(self.compactor.pending_keys(conn, min_entries));
            }
            EngineRequest::Shutdown => return false,
        }
        true
    }
}

/// Worker loop: take the next request from the shared receiver, run it.
///
/// Exits on [`EngineRequest::Shutdown`] or once every sender is dropped.
fn run_worker_pooled(worker: Worker, rx: Arc<std::sync::Mutex<mpsc::Receiver<EngineRequest>>>) {
    loop {
        let request = {
            let mut guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.blocking_recv()
        };

        match request {
            Some(request) => {
                if !worker.handle(request) {
                    break;
                }
            }
            None => break,
        }
    }
    trace!("inventory worker stopped");
}

// =============================================================================
// Request Plumbing
// =============================================================================

async fn request<T>(
    tx: &mpsc::Sender<EngineRequest>,
    build: impl FnOnce(oneshot::Sender<Result<T>>) -> EngineRequest,
) -> Result<T> {
    let (response_tx, response_rx) = oneshot::channel();

    tx.send(build(response_tx))
        .await
        .map_err(|_| Error::Closed("worker pool has shut down".to_string()))?;

    response_rx
        .await
        .map_err(|_| Error::Closed("worker dropped response".to_string()))?
}

/// One sweep: list pending keys, compact them concurrently across workers.
async fn sweep(tx: &mpsc::Sender<EngineRequest>, min_entries: usize) -> Result<CompactionStats> {
    let keys = request(tx, |response| EngineRequest::PendingKeys { min_entries, response }).await?;

    let passes = keys.into_iter().map(|key| {
        request(tx, move |response| EngineRequest::Compact { key, response })
    });

    let mut stats = CompactionStats::default();
    for outcome in join_all(passes).await {
        stats.record(&outcome);
    }
    Ok(stats)
}

// =============================================================================
// Engine
// =============================================================================

/// Async handle to an inventory database.
///
/// Cheap to clone; all clones share one worker pool. Dropping every clone
/// (or calling [`InventoryEngine::shutdown`]) stops the workers and the
/// background sweep.
///
/// # Example
///
/// ```rust,no_run
/// use inventory_journal::{EngineConfig, InventoryEngine, InventoryKey};
///
/// # async fn example() -> inventory_journal::Result<()> {
/// let engine = InventoryEngine::open("inventory.db", EngineConfig::default()).await?;
/// let key = InventoryKey::new("SKU-42", 1);
///
/// engine.register(key.clone(), 100, 10).await?;
/// engine.allocate(key.clone(), 3).await?;
/// let level = engine.get_quantity(key).await?;
/// assert_eq!(level.available(), 97);
///
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InventoryEngine {
    tx: mpsc::Sender<EngineRequest>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    scheduler: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    worker_count: usize,
    config: Arc<EngineConfig>,
    path: Arc<PathBuf>,
}

impl InventoryEngine {
    /// Opens or creates the database at `path` and starts the worker pool.
    ///
    /// Must be called from within a Tokio runtime when a compaction
    /// interval is configured.
    pub async fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        // Creates tables and checks the schema version once; workers then
        // open plain connections.
        drop(Database::open_with_busy_timeout(&path, config.busy_timeout)?);

        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let rx = Arc::new(std::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(config.worker_threads);
        for i in 0..config.worker_threads {
            let conn = schema::open_connection(&path, config.busy_timeout)?;
            let worker = Worker::new(conn, &config);
            let rx = Arc::clone(&rx);

            let handle = thread::Builder::new()
                .name(format!("inventory-worker-{i}"))
                .spawn(move || run_worker_pooled(worker, rx))
                .map_err(|e| Error::Closed(format!("failed to spawn worker thread: {e}")))?;
            workers.push(handle);
        }

        let engine = Self {
            tx,
            workers: Arc::new(Mutex::new(workers)),
            scheduler: Arc::new(Mutex::new(None)),
            worker_count: config.worker_threads,
            config: Arc::new(config),
            path: Arc::new(path),
        };

        if let Some(interval) = engine.config.compaction_interval {
            let task = engine.spawn_compaction_task(interval);
            *engine.scheduler.lock().await = Some(task);
        }

        info!(
            path = %engine.path.display(),
            workers = engine.worker_count,
            "inventory engine opened"
        );
        Ok(engine)
    }

    /// Spawns the periodic sweep.
    ///
    /// The task holds only a weak sender, so it never keeps the pool alive
    /// on its own.
    fn spawn_compaction_task(&self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let weak = self.tx.downgrade();
        let min_entries = self.config.min_entries_to_compact;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(tx) = weak.upgrade() else {
                    break;
                };

                match sweep(&tx, min_entries).await {
                    Ok(stats) if stats.is_idle() => {}
                    Ok(stats) => {
                        info!(
                            keys_folded = stats.keys_folded,
                            keys_skipped = stats.keys_skipped,
                            keys_failed = stats.keys_failed,
                            entries_folded = stats.entries_folded,
                            "background compaction"
                        );
                    }
                    Err(Error::Closed(_)) => break,
                    Err(e) => {
                        error!(error = %e, "background compaction failed");
                    }
                }
            }
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Database file this engine runs against.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Journals a signed change to on-hand and allocated quantity.
    pub async fn adjust(
        &self,
        key: InventoryKey,
        on_hand_delta: i64,
        allocated_delta: i64,
    ) -> Result<JournalEntry> {
        self.command(
            key,
            StockCommand::Adjust {
                on_hand_delta,
                allocated_delta,
            },
        )
        .await
    }

    pub async fn adjust_on_hand(&self, key: InventoryKey, quantity: i64) -> Result<JournalEntry> {
        self.command(key, StockCommand::AdjustOnHand(quantity)).await
    }

    pub async fn allocate(&self, key: InventoryKey, quantity: i64) -> Result<JournalEntry> {
        self.command(key, StockCommand::Allocate(quantity)).await
    }

    pub async fn deallocate(&self, key: InventoryKey, quantity: i64) -> Result<JournalEntry> {
        self.command(key, StockCommand::Deallocate(quantity)).await
    }

    pub async fn release(&self, key: InventoryKey, quantity: i64) -> Result<JournalEntry> {
        self.command(key, StockCommand::Release(quantity)).await
    }

    /// Runs any [`StockCommand`].
    pub async fn command(&self, key: InventoryKey, command: StockCommand) -> Result<JournalEntry> {
        request(&self.tx, |response| EngineRequest::Command {
            key,
            command,
            response,
        })
        .await
    }

    /// Creates the stock record if absent.
    pub async fn register(&self, key: InventoryKey, initial_on_hand: i64, reorder_minimum: i64) -> Result<bool> {
        request(&self.tx, |response| EngineRequest::Register {
            key,
            initial_on_hand,
            reorder_minimum,
            response,
        })
        .await
    }

    pub async fn set_reorder_minimum(&self, key: InventoryKey, minimum: i64) -> Result<bool> {
        request(&self.tx, |response| EngineRequest::SetReorderMinimum {
            key,
            minimum,
            response,
        })
        .await
    }

    /// Removes the sku from its warehouse, including pending journal rows.
    pub async fn remove(&self, key: InventoryKey) -> Result<bool> {
        request(&self.tx, |response| EngineRequest::Remove { key, response }).await
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    pub async fn get_quantity(&self, key: InventoryKey) -> Result<InventoryLevel> {
        request(&self.tx, |response| EngineRequest::GetQuantity { key, response }).await
    }

    pub async fn get_inventory_map(
        &self,
        keys: Vec<InventoryKey>,
    ) -> Result<HashMap<InventoryKey, InventoryLevel>> {
        request(&self.tx, |response| EngineRequest::GetInventoryMap { keys, response }).await
    }

    /// Current counts for one sku in every warehouse, keyed by warehouse id.
    pub async fn get_inventories_for_sku(
        &self,
        sku_code: impl Into<String>,
    ) -> Result<HashMap<i64, InventoryLevel>> {
        let sku_code = sku_code.into();
        request(&self.tx, |response| EngineRequest::GetInventoriesForSku { sku_code, response }).await
    }

    /// See [`LowStockScanner::find_low_stock`].
    pub async fn find_low_stock(
        &self,
        sku_codes: Vec<String>,
        warehouse_id: i64,
        threshold: i64,
    ) -> Result<Vec<LowStockInfo>> {
        request(&self.tx, |response| EngineRequest::FindLowStock {
            sku_codes,
            warehouse_id,
            threshold,
            response,
        })
        .await
    }

    /// See [`LowStockScanner::find_below_reorder_minimum`].
    pub async fn find_below_reorder_minimum(
        &self,
        sku_codes: Vec<String>,
        warehouse_id: i64,
    ) -> Result<Vec<LowStockInfo>> {
        request(&self.tx, |response| EngineRequest::FindBelowReorderMinimum {
            sku_codes,
            warehouse_id,
            response,
        })
        .await
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// One compaction pass over `key`.
    pub async fn compact(&self, key: InventoryKey) -> Result<CompactionOutcome> {
        request(&self.tx, |response| EngineRequest::Compact { key, response }).await
    }

    /// One pass over every key with pending rows, fanned out across workers.
    pub async fn compact_pending(&self) -> Result<CompactionStats> {
        sweep(&self.tx, self.config.min_entries_to_compact).await
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops the background sweep and every worker thread.
    ///
    /// Requests already queued ahead of the shutdown signals are still
    /// served. Later requests from other clones fail with [`Error::Closed`].
    pub async fn shutdown(self) {
        if let Some(task) = self.scheduler.lock().await.take() {
            task.abort();
        }

        for _ in 0..self.worker_count {
            let _ = self.tx.send(EngineRequest::Shutdown).await;
        }

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            let _ = handle.join();
        }
        info!(path = %self.path.display(), "inventory engine stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
