//! Data types shared across the engine.

/// What the index holds for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// A live value (possibly empty)
    Value(Vec<u8>),
    /// Deleted; reads treat it exactly like a key that was never written
    Tombstone,
}

impl Slot {
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone)
    }
}

/// A key with its slot, as handed over by a backing store during hydration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub slot: Slot,
}

/// A live key-value pair returned by scans and accepted by batch puts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Result of a point lookup. An absent key is a successful outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Vec<u8>),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// A single mutation as submitted to a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

impl<'a> Mutation<'a> {
    pub fn key(&self) -> &'a [u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => *key,
        }
    }
}
