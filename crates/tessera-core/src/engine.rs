//! The store engine.
//!
//! [`Engine`] ties the ordered index, the backing store, the coordinator and
//! the stats tracker together behind the request surface.
//!
//! **Write path**: validate, take exclusive access, persist through the
//! backing store, then mirror into the index. If the store refuses, the
//! index is never touched.
//! **Read path**: shared access, served from the index only.
//! **Scans**: materialize a limit-capped result under scan access, then
//! release before returning.

use crate::batch::{self, BatchGetResult, BatchOutcome};
use crate::config::{Config, StorageBackend};
use crate::context::RequestContext;
use crate::coordinator::{EngineState, Phase, RequestCoordinator};
use crate::error::{EngineError, EngineResult};
use crate::index::OrderedIndex;
use crate::scan::ScanRange;
use crate::stats::{StatsSnapshot, StatsTracker};
use crate::store::{CompactionReport, DurableBackingStore, MemoryStore};
use crate::types::{KeyValue, Lookup};
use crate::wal::WalStore;

/// Concurrent ordered key-value engine.
///
/// All public methods take `&self`; share one instance across request
/// workers with an `Arc`.
pub struct Engine {
    coordinator: RequestCoordinator,
    stats: StatsTracker,
    config: Config,
}

impl Engine {
    /// Open the store named by `config.storage` and rebuild the index from it.
    pub fn open(config: Config) -> EngineResult<Self> {
        config.validate()?;
        let store: Box<dyn DurableBackingStore> = match &config.storage {
            StorageBackend::Wal { dir } => Box::new(WalStore::open(
                dir,
                config.sync_mode,
                config.wal_rotation_size_bytes,
            )?),
            StorageBackend::InMemory => Box::new(MemoryStore::new()),
        };
        Self::with_store(store, config)
    }

    /// Build an engine over an already opened store.
    pub fn with_store(store: Box<dyn DurableBackingStore>, config: Config) -> EngineResult<Self> {
        config.validate()?;

        let mut index = OrderedIndex::new();
        for entry in store.read_all()? {
            index.restore(entry.key, entry.slot);
        }
        let footprint = index.footprint();
        tracing::info!(
            location = %store.location(),
            live_keys = footprint.live_keys,
            tombstones = footprint.tombstones,
            sync_mode = ?config.sync_mode,
            "engine opened"
        );
        if let Some(bucket) = &config.object_store.bucket {
            tracing::info!(bucket = %bucket, "object store configured");
        }

        Ok(Self {
            coordinator: RequestCoordinator::new(EngineState { index, store }),
            stats: StatsTracker::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current coordinator state.
    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    /// Store `value` under `key`, overwriting any previous value. Returns once
    /// the backing store has accepted the write.
    pub fn put(&self, ctx: &RequestContext, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.config.check_key(key)?;
        self.config.check_value(value)?;
        let result = self.coordinator.mutate(ctx, "put", |state| {
            state.store.write(key, value)?;
            state.index.put(key, value);
            Ok(())
        });
        self.complete(ctx, "put", result)
    }

    pub fn get(&self, ctx: &RequestContext, key: &[u8]) -> EngineResult<Lookup> {
        self.config.check_key(key)?;
        let result = self.coordinator.read(ctx, "get", |state| state.index.get(key));
        self.complete(ctx, "get", result)
    }

    /// Tombstone `key`. Deleting an absent key succeeds.
    pub fn delete(&self, ctx: &RequestContext, key: &[u8]) -> EngineResult<()> {
        self.config.check_key(key)?;
        let result = self.coordinator.mutate(ctx, "delete", |state| {
            state.store.mark_deleted(key)?;
            state.index.delete(key);
            Ok(())
        });
        self.complete(ctx, "delete", result)
    }

    /// Apply every well-formed entry in order; malformed ones are counted.
    pub fn batch_put(&self, ctx: &RequestContext, entries: &[KeyValue]) -> EngineResult<BatchOutcome> {
        let result = self
            .coordinator
            .mutate(ctx, "batch_put", |state| batch::put_all(state, &self.config, entries));
        self.complete(ctx, "batch_put", result)
    }

    pub fn batch_get(&self, ctx: &RequestContext, keys: &[Vec<u8>]) -> EngineResult<BatchGetResult> {
        let result = self
            .coordinator
            .read(ctx, "batch_get", |state| batch::get_all(&state.index, keys));
        self.complete(ctx, "batch_get", result)
    }

    pub fn batch_delete(&self, ctx: &RequestContext, keys: &[Vec<u8>]) -> EngineResult<BatchOutcome> {
        let result = self
            .coordinator
            .mutate(ctx, "batch_delete", |state| batch::delete_all(state, &self.config, keys));
        self.complete(ctx, "batch_delete", result)
    }

    /// Live entries whose key starts with `prefix`, ascending. A non-positive
    /// `limit` means the configured default.
    pub fn prefix_scan(&self, ctx: &RequestContext, prefix: &[u8], limit: i32) -> EngineResult<Vec<KeyValue>> {
        let limit = self.config.scan_limit(limit);
        let result = self
            .coordinator
            .scan(ctx, "prefix_scan", |index| ScanRange::prefix(prefix).collect(index, limit));
        self.complete(ctx, "prefix_scan", result)
    }

    /// Live entries in `[start, end]`, ascending. An empty bound is open.
    pub fn range_scan(
        &self,
        ctx: &RequestContext,
        start: &[u8],
        end: &[u8],
        limit: i32,
    ) -> EngineResult<Vec<KeyValue>> {
        let limit = self.config.scan_limit(limit);
        let result = self
            .coordinator
            .scan(ctx, "range_scan", |index| ScanRange::between(start, end).collect(index, limit));
        self.complete(ctx, "range_scan", result)
    }

    /// Counters plus key count and size walked from the index. Observing the
    /// counters does not advance them.
    pub fn stats(&self, ctx: &RequestContext) -> EngineResult<StatsSnapshot> {
        let (footprint, location) = self
            .coordinator
            .read(ctx, "stats", |state| (state.index.footprint(), state.store.location()))?;
        Ok(StatsSnapshot {
            total_operations: self.stats.total_operations(),
            last_accessed: self.stats.last_accessed(),
            total_keys: footprint.live_keys,
            total_size_bytes: footprint.live_bytes,
            tombstones: footprint.tombstones,
            location,
        })
    }

    /// Force appended writes to persistent media. Only needed with
    /// [`SyncMode::Fast`](crate::SyncMode::Fast).
    pub fn sync(&self, ctx: &RequestContext) -> EngineResult<()> {
        self.coordinator.mutate(ctx, "sync", |state| {
            state.store.sync()?;
            Ok(())
        })
    }

    /// Rewrite the backing store down to the live entries, then drop
    /// tombstones from the index.
    pub fn compact(&self, ctx: &RequestContext) -> EngineResult<CompactionReport> {
        self.coordinator.mutate(ctx, "compact", |state| {
            let live: Vec<(&[u8], &[u8])> = state.index.live_entries().collect();
            let report = state.store.compact(&live)?;
            let purged = state.index.purge_tombstones();
            tracing::info!(
                records_before = report.records_before,
                records_after = report.records_after,
                bytes_before = report.bytes_before,
                bytes_after = report.bytes_after,
                tombstones_purged = purged,
                "compaction complete"
            );
            Ok(report)
        })
    }

    /// Count a completed request and log the outcome.
    fn complete<T>(&self, ctx: &RequestContext, operation: &'static str, result: EngineResult<T>) -> EngineResult<T> {
        match &result {
            Ok(_) => {
                self.stats.record();
                tracing::debug!(request_id = ctx.request_id, operation, elapsed = ?ctx.elapsed(), "ok");
            }
            Err(err @ EngineError::BackingStore(_)) => {
                tracing::error!(request_id = ctx.request_id, operation, error = %err, "backing store failure");
            }
            Err(_) => {}
        }
        result
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.phase())
            .field("total_operations", &self.stats.total_operations())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::error::ErrorKind;
    use crate::store::FaultSwitch;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    fn memory_engine() -> (Engine, FaultSwitch) {
        let store = MemoryStore::new();
        let faults = store.fault_switch();
        (Engine::with_store(Box::new(store), Config::in_memory()).unwrap(), faults)
    }

    fn disk_engine(dir: &TempDir) -> Engine {
        Engine::open(Config::durable(dir.path())).unwrap()
    }

    fn keys(raw: &[&str]) -> Vec<Vec<u8>> {
        raw.iter().map(|k| k.as_bytes().to_vec()).collect()
    }

    fn scan_keys(entries: &[KeyValue]) -> Vec<Vec<u8>> {
        entries.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn test_put_then_get() {
        let (engine, _) = memory_engine();
        engine.put(&ctx(), b"k", b"v").unwrap();
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(b"v".to_vec()));
    }

    #[test]
    fn test_empty_value_is_not_absent() {
        let (engine, _) = memory_engine();
        engine.put(&ctx(), b"k", b"").unwrap();
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(Vec::new()));
    }

    #[test]
    fn test_overwrite() {
        let (engine, _) = memory_engine();
        engine.put(&ctx(), b"k", b"v1").unwrap();
        engine.put(&ctx(), b"k", b"v2").unwrap();
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(b"v2".to_vec()));
        assert_eq!(engine.stats(&ctx()).unwrap().total_keys, 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (engine, _) = memory_engine();
        engine.delete(&ctx(), b"never-written").unwrap();
        assert_eq!(engine.get(&ctx(), b"never-written").unwrap(), Lookup::NotFound);

        engine.put(&ctx(), b"k", b"v").unwrap();
        for _ in 0..3 {
            engine.delete(&ctx(), b"k").unwrap();
            assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::NotFound);
        }
        assert_eq!(engine.stats(&ctx()).unwrap().total_keys, 0);
    }

    #[test]
    fn test_empty_key_rejected() {
        let (engine, _) = memory_engine();
        for result in [
            engine.put(&ctx(), b"", b"v"),
            engine.delete(&ctx(), b""),
            engine.get(&ctx(), b"").map(|_| ()),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument(_)));
            assert_eq!(err.kind(), ErrorKind::UserError);
        }
        assert_eq!(engine.stats(&ctx()).unwrap().total_operations, 0);
    }

    #[test]
    fn test_batch_semantics() {
        let (engine, _) = memory_engine();
        let outcome = engine
            .batch_put(&ctx(), &[KeyValue::new("a", "1"), KeyValue::new("", "x"), KeyValue::new("a", "2")])
            .unwrap();
        assert_eq!(outcome, BatchOutcome { success_count: 2, failure_count: 1 });
        assert_eq!(engine.get(&ctx(), b"a").unwrap(), Lookup::Found(b"2".to_vec()));

        engine.put(&ctx(), b"c", b"3").unwrap();
        let result = engine.batch_get(&ctx(), &keys(&["a", "b", "c"])).unwrap();
        assert_eq!(result.found.len(), 2);
        assert_eq!(result.missing, keys(&["b"]));

        let outcome = engine.batch_delete(&ctx(), &keys(&["a", "c", "missing"])).unwrap();
        assert_eq!(outcome.success_count, 3);
        assert_eq!(engine.stats(&ctx()).unwrap().total_keys, 0);
    }

    #[test]
    fn test_batch_counts_as_one_operation() {
        let (engine, _) = memory_engine();
        let entries: Vec<_> = (0..10).map(|i| KeyValue::new(format!("k{}", i), "v")).collect();
        engine.batch_put(&ctx(), &entries).unwrap();
        let stats = engine.stats(&ctx()).unwrap();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.total_keys, 10);
    }

    #[test]
    fn test_scans() {
        let (engine, _) = memory_engine();
        for key in ["user:1", "user:2", "order:1"] {
            engine.put(&ctx(), key.as_bytes(), b"v").unwrap();
        }
        let found = engine.prefix_scan(&ctx(), b"user:", 10).unwrap();
        assert_eq!(scan_keys(&found), keys(&["user:1", "user:2"]));

        let (engine, _) = memory_engine();
        for key in ["a", "b", "c", "d", "e"] {
            engine.put(&ctx(), key.as_bytes(), key.as_bytes()).unwrap();
        }
        let found = engine.range_scan(&ctx(), b"b", b"d", 100).unwrap();
        assert_eq!(scan_keys(&found), keys(&["b", "c", "d"]));
        assert!(engine.range_scan(&ctx(), b"z", b"a", 100).unwrap().is_empty());
    }

    #[test]
    fn test_scan_limit_defaults_and_clamps() {
        let (engine, _) = memory_engine();
        let entries: Vec<_> = (0..150).map(|i| KeyValue::new(format!("k{:03}", i), "v")).collect();
        engine.batch_put(&ctx(), &entries).unwrap();

        assert_eq!(engine.prefix_scan(&ctx(), b"k", 0).unwrap().len(), 100);
        assert_eq!(engine.range_scan(&ctx(), b"", b"", -1).unwrap().len(), 100);
        assert_eq!(engine.prefix_scan(&ctx(), b"k", 120).unwrap().len(), 120);
        assert_eq!(engine.prefix_scan(&ctx(), b"k", i32::MAX).unwrap().len(), 150);
    }

    #[test]
    fn test_store_failure_leaves_index_untouched() {
        let (engine, faults) = memory_engine();
        engine.put(&ctx(), b"k", b"old").unwrap();

        faults.fail_writes(true);
        let err = engine.put(&ctx(), b"k", b"new").unwrap_err();
        assert!(matches!(err, EngineError::BackingStore(_)));
        assert!(engine.delete(&ctx(), b"k").is_err());
        assert!(engine.batch_put(&ctx(), &[KeyValue::new("x", "1")]).is_err());

        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(b"old".to_vec()));
        assert_eq!(engine.get(&ctx(), b"x").unwrap(), Lookup::NotFound);
        assert_eq!(engine.phase(), Phase::Idle);

        faults.fail_writes(false);
        engine.put(&ctx(), b"k", b"new").unwrap();
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(b"new".to_vec()));
    }

    #[test]
    fn test_expired_request_applies_nothing() {
        let (engine, _) = memory_engine();
        let expired = RequestContext::with_timeout(Duration::ZERO);
        let err = engine.put(&expired, b"k", b"v").unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { operation: "put", .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_expired_batches_apply_nothing() {
        let (engine, _) = memory_engine();
        engine.put(&ctx(), b"kept", b"v").unwrap();
        let expired = RequestContext::with_timeout(Duration::ZERO);

        let err = engine
            .batch_put(&expired, &[KeyValue::new("a", "1"), KeyValue::new("b", "2")])
            .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { operation: "batch_put", .. }));
        assert_eq!(engine.get(&ctx(), b"a").unwrap(), Lookup::NotFound);
        assert_eq!(engine.get(&ctx(), b"b").unwrap(), Lookup::NotFound);

        let err = engine.batch_delete(&expired, &keys(&["kept", "a"])).unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded { operation: "batch_delete", .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.get(&ctx(), b"kept").unwrap(), Lookup::Found(b"v".to_vec()));
    }

    #[test]
    fn test_stats_reflect_index() {
        let (engine, _) = memory_engine();
        assert!(engine.stats(&ctx()).unwrap().last_accessed.is_none());

        engine.put(&ctx(), b"ab", b"123").unwrap();
        engine.put(&ctx(), b"cd", b"4").unwrap();
        engine.delete(&ctx(), b"cd").unwrap();
        engine.get(&ctx(), b"missing").unwrap();

        let stats = engine.stats(&ctx()).unwrap();
        assert_eq!(stats.total_operations, 4);
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.total_size_bytes, 5);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.location, "memory");
        assert!(stats.last_accessed.is_some());

        // Observing does not count.
        assert_eq!(engine.stats(&ctx()).unwrap().total_operations, 4);
    }

    #[test]
    fn test_concurrent_puts() {
        let (engine, _) = memory_engine();
        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("t{}-k{}", t, i);
                        engine.put(&ctx(), key.as_bytes(), b"v").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = engine.stats(&ctx()).unwrap();
        assert!(stats.total_operations >= 400);
        assert_eq!(stats.total_keys, 400);
    }

    #[test]
    fn test_crash_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let engine = disk_engine(&dir);
            engine.put(&ctx(), b"survive1", b"yes").unwrap();
            engine.put(&ctx(), b"survive2", b"also_yes").unwrap();
            engine.put(&ctx(), b"doomed", b"temp").unwrap();
            engine.delete(&ctx(), b"doomed").unwrap();
            engine
                .batch_put(&ctx(), &[KeyValue::new("batch:1", "a"), KeyValue::new("batch:2", "b")])
                .unwrap();
        }
        let engine = disk_engine(&dir);
        assert_eq!(engine.get(&ctx(), b"survive1").unwrap(), Lookup::Found(b"yes".to_vec()));
        assert_eq!(engine.get(&ctx(), b"survive2").unwrap(), Lookup::Found(b"also_yes".to_vec()));
        assert_eq!(engine.get(&ctx(), b"doomed").unwrap(), Lookup::NotFound);
        assert_eq!(engine.prefix_scan(&ctx(), b"batch:", 0).unwrap().len(), 2);
        assert_eq!(engine.stats(&ctx()).unwrap().total_keys, 4);
    }

    #[test]
    fn test_compaction_purges_tombstones_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = disk_engine(&dir);
            for i in 0..20 {
                engine.put(&ctx(), format!("k{:02}", i).as_bytes(), b"v").unwrap();
            }
            for i in 0..10 {
                engine.delete(&ctx(), format!("k{:02}", i).as_bytes()).unwrap();
            }
            assert_eq!(engine.stats(&ctx()).unwrap().tombstones, 10);

            let report = engine.compact(&ctx()).unwrap();
            assert_eq!(report.records_before, 30);
            assert_eq!(report.records_after, 10);
            let stats = engine.stats(&ctx()).unwrap();
            assert_eq!(stats.tombstones, 0);
            assert_eq!(stats.total_keys, 10);

            engine.put(&ctx(), b"after", b"compaction").unwrap();
        }
        let engine = disk_engine(&dir);
        let stats = engine.stats(&ctx()).unwrap();
        assert_eq!(stats.total_keys, 11);
        assert_eq!(stats.tombstones, 0);
        assert_eq!(engine.get(&ctx(), b"k05").unwrap(), Lookup::NotFound);
        assert_eq!(engine.get(&ctx(), b"k15").unwrap(), Lookup::Found(b"v".to_vec()));
    }

    #[test]
    fn test_fast_mode_sync() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::durable(dir.path());
        config.sync_mode = SyncMode::Fast;
        {
            let engine = Engine::open(config.clone()).unwrap();
            engine.put(&ctx(), b"k", b"v").unwrap();
            engine.sync(&ctx()).unwrap();
        }
        let engine = Engine::open(config).unwrap();
        assert_eq!(engine.get(&ctx(), b"k").unwrap(), Lookup::Found(b"v".to_vec()));
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut config = Config::in_memory();
        config.max_value_size = 8;
        let engine = Engine::open(config).unwrap();
        let err = engine.put(&ctx(), b"k", b"123456789").unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::in_memory();
        config.default_scan_limit = 0;
        assert!(matches!(Engine::open(config), Err(EngineError::Config(_))));
    }
}
