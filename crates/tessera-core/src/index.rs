//! In-memory ordered index over raw byte keys.
//!
//! Keys compare as unsigned bytes (the `Ord` of `[u8]`), so iteration order
//! is exactly lexicographic byte order. Deletes leave a [`Slot::Tombstone`]
//! behind until [`OrderedIndex::purge_tombstones`] runs after a backing-store
//! compaction; every read path skips tombstones.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::types::{Lookup, Slot};

/// Counts derived by walking the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footprint {
    /// Keys holding a live value
    pub live_keys: u64,
    /// Bytes of live keys plus their values
    pub live_bytes: u64,
    /// Keys holding a tombstone
    pub tombstones: u64,
}

#[derive(Debug, Default)]
pub struct OrderedIndex {
    map: BTreeMap<Vec<u8>, Slot>,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. There is never more than one slot per key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        match self.map.get_mut(key) {
            Some(slot) => *slot = Slot::Value(value.to_vec()),
            None => {
                self.map.insert(key.to_vec(), Slot::Value(value.to_vec()));
            }
        }
    }

    /// Tombstone `key`, whether or not it currently holds a value.
    pub fn delete(&mut self, key: &[u8]) {
        match self.map.get_mut(key) {
            Some(slot) => *slot = Slot::Tombstone,
            None => {
                self.map.insert(key.to_vec(), Slot::Tombstone);
            }
        }
    }

    /// Install a slot replayed from the backing store.
    pub fn restore(&mut self, key: Vec<u8>, slot: Slot) {
        self.map.insert(key, slot);
    }

    pub fn get(&self, key: &[u8]) -> Lookup {
        match self.map.get(key).and_then(Slot::as_value) {
            Some(value) => Lookup::Found(value.to_vec()),
            None => Lookup::NotFound,
        }
    }

    /// Borrowing variant of [`get`](Self::get).
    pub fn get_ref(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).and_then(Slot::as_value)
    }

    /// Ascending slots starting at `lower`, tombstones included.
    ///
    /// The iterator is lazy and borrows the index, so it always reflects the
    /// state at the moment of the call; a fresh call starts a fresh sequence.
    pub fn iter_from(&self, lower: Bound<&[u8]>) -> Entries<'_> {
        Entries { inner: self.map.range::<[u8], _>((lower, Bound::Unbounded)) }
    }

    /// Ascending live pairs starting at `lower`.
    pub fn live_from<'a>(&'a self, lower: Bound<&[u8]>) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.iter_from(lower)
            .filter_map(|(key, slot)| slot.as_value().map(|value| (key, value)))
    }

    /// Every live pair in key order.
    pub fn live_entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.live_from(Bound::Unbounded)
    }

    pub fn footprint(&self) -> Footprint {
        let mut footprint = Footprint::default();
        for (key, slot) in &self.map {
            match slot {
                Slot::Value(value) => {
                    footprint.live_keys += 1;
                    footprint.live_bytes += (key.len() + value.len()) as u64;
                }
                Slot::Tombstone => footprint.tombstones += 1,
            }
        }
        footprint
    }

    /// Physically drop tombstones. Only valid once the backing store no
    /// longer holds the deleted values. Returns how many were removed.
    pub fn purge_tombstones(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_tombstone());
        before - self.map.len()
    }

    /// Number of slots, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.map.len()
    }
}

/// Lazy ascending iterator over index slots.
pub struct Entries<'a> {
    inner: btree_map::Range<'a, Vec<u8>, Slot>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (&'a [u8], &'a Slot);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, slot)| (key.as_slice(), slot))
    }
}
