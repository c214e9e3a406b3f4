//! Configuration management for Tessera
//!
//! Provides presets for on-disk and ephemeral engines, a validator, and
//! environment loading for the server binary.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Where acknowledged mutations are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Append-only record log under `dir/wal`
    Wal { dir: PathBuf },
    /// Process-local store; contents die with the engine
    InMemory,
}

/// When the log is forced to persistent media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Durable sync before every mutation or batch is acknowledged
    Durable,
    /// Append only; callers make writes durable with `Engine::sync`
    Fast,
}

/// Remote object storage settings. Carried through unchanged; the engine
/// never interprets them beyond reporting the bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub bucket: Option<String>,
    pub credentials_path: Option<PathBuf>,
}

/// Tessera engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Persistence backend
    pub storage: StorageBackend,
    /// Log sync policy
    pub sync_mode: SyncMode,
    /// Log file rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Scan limit used when a request passes a non-positive limit
    pub default_scan_limit: usize,
    /// Upper bound applied to every requested scan limit
    pub max_scan_limit: usize,
    /// Opaque remote storage settings
    pub object_store: ObjectStoreConfig,
}

impl Config {
    /// On-disk engine rooted at `dir`, fsync on every acknowledged write.
    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageBackend::Wal { dir: dir.into() },
            ..Self::in_memory()
        }
    }

    /// Ephemeral engine backed by [`crate::MemoryStore`].
    pub fn in_memory() -> Self {
        Self {
            storage: StorageBackend::InMemory,
            sync_mode: SyncMode::Durable,
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            max_key_size: 4096,
            max_value_size: 16 * 1024 * 1024,
            default_scan_limit: 100,
            max_scan_limit: 10_000,
            object_store: ObjectStoreConfig::default(),
        }
    }

    /// Build from environment variables, starting from the in-memory preset.
    ///
    /// - `TESSERA_DATA_DIR`: switches to the on-disk log under that directory
    /// - `TESSERA_SYNC_MODE`: `durable` or `fast`
    /// - `TESSERA_MAX_SCAN_LIMIT`: cap on scan results
    /// - `BUCKET_NAME`, `TESSERA_OBJECT_STORE_CREDENTIALS`: object store pass-through
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let mut config = match lookup("TESSERA_DATA_DIR").filter(|d| !d.is_empty()) {
            Some(dir) => Self::durable(dir),
            None => Self::in_memory(),
        };

        if let Some(mode) = lookup("TESSERA_SYNC_MODE") {
            config.sync_mode = match mode.to_ascii_lowercase().as_str() {
                "durable" => SyncMode::Durable,
                "fast" => SyncMode::Fast,
                other => {
                    return Err(EngineError::Config(format!(
                        "TESSERA_SYNC_MODE must be 'durable' or 'fast', got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(limit) = lookup("TESSERA_MAX_SCAN_LIMIT") {
            config.max_scan_limit = limit.parse().map_err(|_| {
                EngineError::Config(format!("TESSERA_MAX_SCAN_LIMIT is not a number: '{}'", limit))
            })?;
        }

        config.object_store.bucket = lookup("BUCKET_NAME").filter(|b| !b.is_empty());
        config.object_store.credentials_path =
            lookup("TESSERA_OBJECT_STORE_CREDENTIALS").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: &str| Err(EngineError::Config(msg.to_string()));

        if let StorageBackend::Wal { dir } = &self.storage {
            if dir.as_os_str().is_empty() {
                return fail("storage directory must not be empty");
            }
        }
        if self.wal_rotation_size_bytes < 1024 * 1024 {
            return fail("wal_rotation_size_bytes must be >= 1MB");
        }
        if self.max_key_size == 0 || self.max_key_size > u16::MAX as usize {
            return fail("max_key_size must be in [1, 65535]");
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return fail("max_value_size must be in [1, 128MB]");
        }
        if self.default_scan_limit == 0 {
            return fail("default_scan_limit must be > 0");
        }
        if self.max_scan_limit < self.default_scan_limit {
            return fail("max_scan_limit must be >= default_scan_limit");
        }
        Ok(())
    }

    /// Reject empty or oversized keys.
    pub fn check_key(&self, key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }
        if key.len() > self.max_key_size {
            return Err(EngineError::InvalidArgument(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                self.max_key_size
            )));
        }
        Ok(())
    }

    pub fn check_value(&self, value: &[u8]) -> EngineResult<()> {
        if value.len() > self.max_value_size {
            return Err(EngineError::InvalidArgument(format!(
                "value is {} bytes, limit is {}",
                value.len(),
                self.max_value_size
            )));
        }
        Ok(())
    }

    /// Resolve a caller-supplied scan limit: non-positive means the default,
    /// anything above the cap is clamped.
    pub fn scan_limit(&self, requested: i32) -> usize {
        if requested <= 0 {
            self.default_scan_limit
        } else {
            (requested as usize).min(self.max_scan_limit)
        }
    }
}

impl Default for Config {
    fn default() -> Self { Self::in_memory() }
}
