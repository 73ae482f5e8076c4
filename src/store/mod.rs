//! Recipe Run Store
//!
//! Persists reconstructed recipe runs for audit/history, keyed by
//! (machine unique name, start time, recipe). Each machine gets its own
//! sled tree; keys sort chronologically so range scans are cheap.
//!
//! Re-running a cycle upserts the same keys, so the store is idempotent
//! across overlapping reporting windows. The latest persisted end time per
//! machine feeds the incremental historian start optimization.

use crate::types::RecipeRunRecord;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for run-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sled-backed store of reconstructed recipe runs.
///
/// Note: writes are not flushed individually; sled's background flushing
/// provides durability. On crash, at most the last few upserts are lost,
/// which the next cycle regenerates from the historian.
#[derive(Clone)]
pub struct RecipeRunStore {
    db: Arc<sled::Db>,
}

impl RecipeRunStore {
    /// Open or create the store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or replace the run keyed by (machine, start, recipe).
    ///
    /// Key layout: start epoch-millis as u64 big-endian (sorts
    /// chronologically; timestamps are post-1970 in practice), then a NUL,
    /// then the recipe name.
    pub fn upsert(&self, record: &RecipeRunRecord) -> Result<(), StoreError> {
        let tree = self.db.open_tree(record.machine.as_bytes())?;
        let key = run_key(record.start, &record.recipe);
        let value = serde_json::to_vec(record)?;
        tree.insert(key, value)?;
        Ok(())
    }

    /// All persisted runs for a machine whose start falls in `[start, end]`,
    /// ordered by start time.
    pub fn runs_in_range(
        &self,
        machine: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecipeRunRecord>, StoreError> {
        let tree = self.db.open_tree(machine.as_bytes())?;
        let low = millis_key(start);
        let high = millis_key(end + chrono::Duration::milliseconds(1));

        let mut runs = Vec::new();
        for item in tree.range(low.as_slice()..high.as_slice()) {
            let (_key, value) = item?;
            match serde_json::from_slice::<RecipeRunRecord>(&value) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::warn!(machine, error = %e, "Skipping undecodable run row");
                }
            }
        }
        Ok(runs)
    }

    /// Latest persisted run end time for a machine, if any.
    ///
    /// Runs are non-overlapping and keyed by start, so the last key holds
    /// the maximum end; end times are scanned anyway to stay correct
    /// if historical rows were ever backfilled out of order.
    pub fn max_end_time(&self, machine: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let tree = self.db.open_tree(machine.as_bytes())?;
        let mut max_end: Option<DateTime<Utc>> = None;
        for item in tree.iter() {
            let (_key, value) = item?;
            if let Ok(run) = serde_json::from_slice::<RecipeRunRecord>(&value) {
                if max_end.is_none_or(|current| run.end > current) {
                    max_end = Some(run.end);
                }
            }
        }
        Ok(max_end)
    }

    /// Total number of persisted runs across all machines.
    pub fn count(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for name in self.db.tree_names() {
            if name == self.db.name() {
                continue;
            }
            total += self.db.open_tree(name)?.len();
        }
        Ok(total)
    }

    /// Delete runs that started before `cutoff`. Returns how many were removed.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff_key = millis_key(cutoff);
        let mut deleted = 0;

        for name in self.db.tree_names() {
            if name == self.db.name() {
                continue;
            }
            let tree = self.db.open_tree(name)?;
            let stale: Vec<_> = tree
                .range(..cutoff_key.as_slice())
                .filter_map(|item| item.ok().map(|(key, _)| key.to_vec()))
                .collect();
            for key in stale {
                tree.remove(key)?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.db.flush()?;
        }
        Ok(deleted)
    }
}

fn millis_key(t: DateTime<Utc>) -> [u8; 8] {
    (t.timestamp_millis() as u64).to_be_bytes()
}

fn run_key(start: DateTime<Utc>, recipe: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + recipe.len());
    key.extend_from_slice(&millis_key(start));
    key.push(0);
    key.extend_from_slice(recipe.as_bytes());
    key
}
