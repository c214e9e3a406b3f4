//! Batch operations.
//!
//! A batch runs under a single exclusive acquisition. Items are validated
//! one by one; a bad item is counted and skipped, never aborting its
//! siblings. The accepted items go to the backing store as one
//! `write_batch` call and only then reach the index, in submission order,
//! so a later duplicate key in the same batch wins.

use hashbrown::{HashMap, HashSet};

use crate::config::Config;
use crate::coordinator::EngineState;
use crate::error::EngineResult;
use crate::index::OrderedIndex;
use crate::types::{KeyValue, Mutation};

/// Per-batch item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub failure_count: usize,
}

/// Result of a batch lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGetResult {
    /// Found keys; duplicates in the request collapse to one entry
    pub found: HashMap<Vec<u8>, Vec<u8>>,
    /// Keys not found, in the order first requested, each listed once
    pub missing: Vec<Vec<u8>>,
}

pub(crate) fn put_all(
    state: &mut EngineState,
    config: &Config,
    entries: &[KeyValue],
) -> EngineResult<BatchOutcome> {
    let mut failure_count = 0;
    let mut accepted = Vec::with_capacity(entries.len());
    for entry in entries {
        match config.check_key(&entry.key).and_then(|_| config.check_value(&entry.value)) {
            Ok(()) => accepted.push(Mutation::Put { key: &entry.key, value: &entry.value }),
            Err(err) => {
                tracing::debug!(%err, "skipping batch put item");
                failure_count += 1;
            }
        }
    }

    apply(state, &accepted)?;
    Ok(BatchOutcome { success_count: accepted.len(), failure_count })
}

pub(crate) fn delete_all(
    state: &mut EngineState,
    config: &Config,
    keys: &[Vec<u8>],
) -> EngineResult<BatchOutcome> {
    let mut failure_count = 0;
    let mut accepted = Vec::with_capacity(keys.len());
    for key in keys {
        match config.check_key(key) {
            Ok(()) => accepted.push(Mutation::Delete { key }),
            Err(err) => {
                tracing::debug!(%err, "skipping batch delete item");
                failure_count += 1;
            }
        }
    }

    apply(state, &accepted)?;
    Ok(BatchOutcome { success_count: accepted.len(), failure_count })
}

/// Persist, then mirror into the index. A store failure leaves the index untouched.
fn apply(state: &mut EngineState, accepted: &[Mutation<'_>]) -> EngineResult<()> {
    if accepted.is_empty() {
        return Ok(());
    }
    state.store.write_batch(accepted)?;
    for mutation in accepted {
        match *mutation {
            Mutation::Put { key, value } => state.index.put(key, value),
            Mutation::Delete { key } => state.index.delete(key),
        }
    }
    Ok(())
}

pub(crate) fn get_all(index: &OrderedIndex, keys: &[Vec<u8>]) -> BatchGetResult {
    let mut result = BatchGetResult::default();
    let mut reported_missing: HashSet<&[u8]> = HashSet::new();

    for key in keys {
        if result.found.contains_key(key.as_slice()) {
            continue;
        }
        match index.get_ref(key) {
            Some(value) => {
                result.found.insert(key.clone(), value.to_vec());
            }
            None => {
                if reported_missing.insert(key.as_slice()) {
                    result.missing.push(key.clone());
                }
            }
        }
    }
    result
}
