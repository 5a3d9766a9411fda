//! Engine configuration.
//!
//! Defaults live in named constants. [`EngineConfig::from_env`] overlays
//! `INVENTORY_JOURNAL_*` environment variables for deployments that
//! configure through the environment.

use std::env;
use std::str::FromStr;
use std::thread::available_parallelism;
use std::time::Duration;

use crate::compactor::{CompactorConfig, DEFAULT_LEASE_DURATION_MS, DEFAULT_MAX_ENTRIES_PER_PASS};
use crate::error::{Error, Result};
use crate::schema::DEFAULT_BUSY_TIMEOUT_MS;

/// Background compaction interval.
pub const DEFAULT_COMPACTION_INTERVAL_MS: u64 = 60_000;

/// Keys with fewer pending rows are left for a later sweep.
pub const DEFAULT_MIN_ENTRIES_TO_COMPACT: usize = 1;

/// Minimum number of worker threads.
const MIN_WORKER_THREADS: usize = 1;

/// Maximum number of worker threads.
const MAX_WORKER_THREADS: usize = 16;

const ENV_PREFIX: &str = "INVENTORY_JOURNAL_";

/// Configuration for an [`InventoryEngine`](crate::engine::InventoryEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a connection waits for SQLite's write lock.
    pub busy_timeout: Duration,

    /// Lease on a per-key compaction lock.
    pub lease_duration: Duration,

    /// Maximum journal rows folded per key per pass.
    pub max_entries_per_pass: usize,

    /// Pending rows a key needs before a sweep compacts it.
    pub min_entries_to_compact: usize,

    /// Period of the background sweep. `None` disables it.
    pub compaction_interval: Option<Duration>,

    /// Worker threads, each owning one connection.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let worker_threads = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKER_THREADS)
            .clamp(MIN_WORKER_THREADS, MAX_WORKER_THREADS);

        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            lease_duration: Duration::from_millis(DEFAULT_LEASE_DURATION_MS),
            max_entries_per_pass: DEFAULT_MAX_ENTRIES_PER_PASS,
            min_entries_to_compact: DEFAULT_MIN_ENTRIES_TO_COMPACT,
            compaction_interval: Some(Duration::from_millis(DEFAULT_COMPACTION_INTERVAL_MS)),
            worker_threads,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with environment variables:
    ///
    /// - `INVENTORY_JOURNAL_BUSY_TIMEOUT_MS`
    /// - `INVENTORY_JOURNAL_LEASE_MS`
    /// - `INVENTORY_JOURNAL_MAX_ENTRIES_PER_PASS`
    /// - `INVENTORY_JOURNAL_MIN_ENTRIES`
    /// - `INVENTORY_JOURNAL_COMPACTION_INTERVAL_MS` (`0` disables)
    /// - `INVENTORY_JOURNAL_WORKER_THREADS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(ms) = parse::<u64>(&var, "BUSY_TIMEOUT_MS")? {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&var, "LEASE_MS")? {
            config.lease_duration = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&var, "MAX_ENTRIES_PER_PASS")? {
            config.max_entries_per_pass = n;
        }
        if let Some(n) = parse::<usize>(&var, "MIN_ENTRIES")? {
            config.min_entries_to_compact = n;
        }
        if let Some(ms) = parse::<u64>(&var, "COMPACTION_INTERVAL_MS")? {
            config.compaction_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(n) = parse::<usize>(&var, "WORKER_THREADS")? {
            config.worker_threads = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries_per_pass == 0 {
            return Err(Error::Config("max_entries_per_pass must be at least 1".to_string()));
        }
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(Error::Config(format!(
                "worker_threads must be between {MIN_WORKER_THREADS} and {MAX_WORKER_THREADS}, got {}",
                self.worker_threads
            )));
        }
        if self.lease_duration.is_zero() {
            return Err(Error::Config("lease_duration must be positive".to_string()));
        }
        Ok(())
    }

    /// The compactor tuning carried by this configuration.
    pub fn compactor(&self) -> CompactorConfig {
        CompactorConfig {
            lease_duration: self.lease_duration,
            max_entries_per_pass: self.max_entries_per_pass,
        }
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, suffix: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match var(suffix) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{ENV_PREFIX}{suffix}={raw:?}: {e}"))),
    }
}
