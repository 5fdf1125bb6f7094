use std::sync::{Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, error};

use crate::persist::EntryLog;

use super::aggregate::{self, RollingAggregate};
use super::entry::FusedEntry;

/// Timeline failures. Both variants indicate an internal invariant breach
/// or a broken durability contract, and are fatal to the session.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("timeline ordering violation: entry [{start_ms}, {end_ms}) cannot follow end {expected_ms}")]
    OrderingViolation {
        start_ms: u64,
        end_ms: u64,
        expected_ms: u64,
    },

    #[error("write-ahead log failure: {0}")]
    Storage(#[from] std::io::Error),
}

/// Append-only, time-indexed sequence of fused entries.
///
/// Single logical writer, many readers: appends validate the partition
/// invariant and go through the write-ahead log before the entry becomes
/// visible, so a reader observes either a complete entry or none.
pub struct TimelineStore {
    entries: RwLock<Vec<FusedEntry>>,
    wal: Mutex<Box<dyn EntryLog>>,
    aggregate_cache: Mutex<Option<AggregateCache>>,
}

struct AggregateCache {
    window_ms: u64,
    entry_count: usize,
    aggregate: RollingAggregate,
}

impl TimelineStore {
    pub fn new(wal: Box<dyn EntryLog>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            wal: Mutex::new(wal),
            aggregate_cache: Mutex::new(None),
        }
    }

    /// Store without durable backing (tests, ephemeral sessions)
    pub fn in_memory() -> Self {
        Self::new(Box::new(crate::persist::NullEntryLog))
    }

    /// Append the next entry of the partition.
    ///
    /// The first entry must start at 0 and every entry must start where
    /// the previous one ended; anything else is an internal bug, not bad
    /// input. The entry is durably recorded before it becomes readable.
    pub fn append(&self, entry: FusedEntry) -> Result<(), TimelineError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let expected_ms = entries.last().map(|e| e.end_ms).unwrap_or(0);
        if entry.start_ms != expected_ms || entry.end_ms <= entry.start_ms {
            error!(
                "ordering violation: [{}, {}) after end {}",
                entry.start_ms, entry.end_ms, expected_ms
            );
            return Err(TimelineError::OrderingViolation {
                start_ms: entry.start_ms,
                end_ms: entry.end_ms,
                expected_ms,
            });
        }

        self.wal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&entry)?;

        debug!(
            "appended entry [{}ms, {}ms) dominant={}",
            entry.start_ms, entry.end_ms, entry.dominant
        );
        entries.push(entry);

        *self
            .aggregate_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    /// Point-in-time copy of the timeline, safe to iterate while the
    /// writer continues appending
    pub fn snapshot(&self) -> Vec<FusedEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries appended after the given index (live consumers)
    pub fn entries_since(&self, index: usize) -> Vec<FusedEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(index..).map(|s| s.to_vec()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End of the covered partition, 0 when empty
    pub fn end_ms(&self) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|e| e.end_ms)
            .unwrap_or(0)
    }

    /// Aggregate over the trailing window, cached until the next append
    pub fn rolling_aggregate(&self, window_ms: u64) -> RollingAggregate {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut cache = self
            .aggregate_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref() {
            if cached.window_ms == window_ms && cached.entry_count == entries.len() {
                return cached.aggregate.clone();
            }
        }
        let aggregate = aggregate::compute(&entries, window_ms);
        *cache = Some(AggregateCache {
            window_ms,
            entry_count: entries.len(),
            aggregate: aggregate.clone(),
        });
        aggregate
    }

    /// Session-wide duration-weighted label breakdown
    pub fn distribution_ms(&self) -> std::collections::BTreeMap<crate::signal::EmotionLabel, u64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        aggregate::distribution_ms(&entries)
    }

    /// Flush the write-ahead log (terminal flush at session stop)
    pub fn flush_wal(&self) -> Result<(), TimelineError> {
        self.wal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}
