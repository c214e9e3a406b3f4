//! Tessera Core: concurrent ordered key-value store engine
//!
//! An in-memory ordered index serves every read, while a pluggable
//! [`DurableBackingStore`] is the source of truth for every write.
//!
//! # Architecture
//!
//! - **Write path**: validate, persist through the backing store, then
//!   update the index, all under one exclusive section
//! - **Read path**: shared access to the index, concurrent with other reads
//! - **Scans**: prefix and inclusive range iteration in unsigned byte order,
//!   limit-capped and materialized before access is released
//! - **Recovery**: the index is rebuilt from the backing store on open
//!
//! The bundled [`WalStore`] keeps an append-only, checksummed record log with
//! rotation and compaction. [`MemoryStore`] backs ephemeral engines.

pub mod batch;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod scan;
pub mod stats;
pub mod store;
pub mod types;
pub mod wal;

// Re-export key types for convenience
pub use batch::{BatchGetResult, BatchOutcome};
pub use config::{Config, ObjectStoreConfig, StorageBackend, SyncMode};
pub use context::{CancelToken, RequestContext};
pub use coordinator::Phase;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorKind, StoreError, StoreResult};
pub use index::OrderedIndex;
pub use scan::ScanRange;
pub use stats::{StatsSnapshot, StatsTracker};
pub use store::{CompactionReport, DurableBackingStore, FaultSwitch, MemoryStore};
pub use types::{Entry, KeyValue, Lookup, Mutation, Slot};
pub use wal::WalStore;
