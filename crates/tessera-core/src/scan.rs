//! Prefix and range scans over the ordered index.
//!
//! Both scans seek to their lower bound, walk forward in byte order and stop
//! at the first key past the upper bound or once `limit` live entries are
//! collected. Tombstones inside the window are skipped without counting
//! against the limit.

use std::ops::Bound;

use crate::index::OrderedIndex;
use crate::types::KeyValue;

/// Key window of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRange<'a> {
    /// Keys starting with the given bytes; empty matches everything
    Prefix(&'a [u8]),
    /// Keys in `[start, end]`; an empty bound is open on that side
    Between { start: &'a [u8], end: &'a [u8] },
}

impl<'a> ScanRange<'a> {
    pub fn prefix(prefix: &'a [u8]) -> Self {
        ScanRange::Prefix(prefix)
    }

    pub fn between(start: &'a [u8], end: &'a [u8]) -> Self {
        ScanRange::Between { start, end }
    }

    /// True when no key can fall in the window.
    fn is_empty(&self) -> bool {
        match *self {
            ScanRange::Prefix(_) => false,
            ScanRange::Between { start, end } => !start.is_empty() && !end.is_empty() && start > end,
        }
    }

    fn lower(&self) -> Bound<&'a [u8]> {
        match *self {
            ScanRange::Prefix(prefix) if !prefix.is_empty() => Bound::Included(prefix),
            ScanRange::Between { start, .. } if !start.is_empty() => Bound::Included(start),
            _ => Bound::Unbounded,
        }
    }

    /// Whether `key`, reached in ascending order, is still inside the window.
    fn admits(&self, key: &[u8]) -> bool {
        match *self {
            ScanRange::Prefix(prefix) => key.starts_with(prefix),
            ScanRange::Between { end, .. } => end.is_empty() || key <= end,
        }
    }

    /// Materialize up to `limit` live entries in ascending key order.
    pub fn collect(&self, index: &OrderedIndex, limit: usize) -> Vec<KeyValue> {
        if self.is_empty() || limit == 0 {
            return Vec::new();
        }
        index
            .iter_from(self.lower())
            .take_while(|(key, _)| self.admits(key))
            .filter_map(|(key, slot)| slot.as_value().map(|value| KeyValue::new(key, value)))
            .take(limit)
            .collect()
    }
}
