//! Durable backing store seam.
//!
//! The engine's ordered index is a cache over a [`DurableBackingStore`]: every
//! mutation is handed to the store first and only reaches the index once the
//! store has accepted it. On open the index is rebuilt from [`read_all`].
//!
//! [`read_all`]: DurableBackingStore::read_all

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::{StoreError, StoreResult};
use crate::types::{Entry, Mutation, Slot};

/// What a compaction pass did to the store's footprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Records held before compaction (live values, overwrites, tombstones)
    pub records_before: u64,
    /// Records held afterwards; one per live key
    pub records_after: u64,
    /// Stored bytes before compaction
    pub bytes_before: u64,
    /// Stored bytes afterwards
    pub bytes_after: u64,
}

impl CompactionReport {
    /// Records reclaimed by this pass.
    pub fn records_removed(&self) -> u64 {
        self.records_before.saturating_sub(self.records_after)
    }
}

/// Persistence capability the engine writes through.
///
/// Methods taking `&mut self` are only ever called while the engine holds
/// exclusive access, so implementations need no internal locking for them.
pub trait DurableBackingStore: Send + Sync {
    /// Persist `value` under `key`. Must not return `Ok` before the store
    /// would reproduce the write from [`read_all`](Self::read_all).
    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Persist a tombstone for `key`.
    fn mark_deleted(&mut self, key: &[u8]) -> StoreResult<()>;

    /// Persist several mutations in order. Stores that can amortize their
    /// durability cost across a batch override this.
    fn write_batch(&mut self, batch: &[Mutation<'_>]) -> StoreResult<()> {
        for mutation in batch {
            match *mutation {
                Mutation::Put { key, value } => self.write(key, value)?,
                Mutation::Delete { key } => self.mark_deleted(key)?,
            }
        }
        Ok(())
    }

    /// Every key the store knows, last write winning, tombstones included.
    fn read_all(&self) -> StoreResult<Vec<Entry>>;

    /// Force buffered writes to persistent media.
    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Rewrite the store so it holds exactly `live` and nothing else.
    fn compact(&mut self, live: &[(&[u8], &[u8])]) -> StoreResult<CompactionReport>;

    /// Human-readable location, reported by stats.
    fn location(&self) -> String;
}

/// Shared switch that makes a [`MemoryStore`] reject writes, standing in for
/// an unreachable remote store.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch(Arc<AtomicBool>);

impl FaultSwitch {
    pub fn fail_writes(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-local backing store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<Vec<u8>, Slot>,
    /// Mutations accepted since the last compaction
    records: u64,
    faults: FaultSwitch,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for injecting write failures.
    pub fn fault_switch(&self) -> FaultSwitch {
        self.faults.clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.faults.is_failing() {
            return Err(StoreError::Unavailable("memory store is rejecting writes".into()));
        }
        Ok(())
    }

    fn stored_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, slot)| (k.len() + slot.as_value().map_or(0, <[u8]>::len)) as u64)
            .sum()
    }
}

impl DurableBackingStore for MemoryStore {
    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        self.entries.insert(key.to_vec(), Slot::Value(value.to_vec()));
        self.records += 1;
        Ok(())
    }

    fn mark_deleted(&mut self, key: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        self.entries.insert(key.to_vec(), Slot::Tombstone);
        self.records += 1;
        Ok(())
    }

    fn write_batch(&mut self, batch: &[Mutation<'_>]) -> StoreResult<()> {
        // All or nothing: a fault rejects the whole batch.
        self.check_available()?;
        for mutation in batch {
            let slot = match *mutation {
                Mutation::Put { value, .. } => Slot::Value(value.to_vec()),
                Mutation::Delete { .. } => Slot::Tombstone,
            };
            self.entries.insert(mutation.key().to_vec(), slot);
            self.records += 1;
        }
        Ok(())
    }

    fn read_all(&self) -> StoreResult<Vec<Entry>> {
        Ok(self
            .entries
            .iter()
            .map(|(key, slot)| Entry { key: key.clone(), slot: slot.clone() })
            .collect())
    }

    fn compact(&mut self, live: &[(&[u8], &[u8])]) -> StoreResult<CompactionReport> {
        self.check_available()?;
        let records_before = self.records;
        let bytes_before = self.stored_bytes();

        self.entries = live
            .iter()
            .map(|(k, v)| (k.to_vec(), Slot::Value(v.to_vec())))
            .collect();
        self.records = self.entries.len() as u64;

        Ok(CompactionReport {
            records_before,
            records_after: self.records,
            bytes_before,
            bytes_after: self.stored_bytes(),
        })
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
