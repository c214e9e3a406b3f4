//! Append-only record log and the [`WalStore`] backing store built on it.
//!
//! Write ordering for every acknowledged mutation:
//! 1. Encode the record (CRC32C over op, sequence and payload)
//! 2. Append it to the current log file
//! 3. `durable_sync` the file (skipped in [`SyncMode::Fast`]); a failed
//!    write or sync is truncated back out of the file
//! 4. Return; only now may the engine update its index
//!
//! Log files live in `<dir>/wal` as `wal-<generation:016x>.tlog` and are
//! replayed in generation order on open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::config::SyncMode;
use crate::error::{StoreError, StoreResult};
use crate::format::{decode_record, encode_record, find_next_magic, Decoded, Operation, Record};
use crate::store::{CompactionReport, DurableBackingStore};
use crate::types::{Entry, Mutation, Slot};

const FILE_PREFIX: &str = "wal-";
const FILE_SUFFIX: &str = ".tlog";

/// Force file contents to persistent media.
///
/// - Linux: `fdatasync()`, data without metadata
/// - Apple: `fcntl(F_FULLFSYNC)`, plain fsync stops at the drive cache there
/// - Elsewhere: `File::sync_data`
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File` borrowed for the call.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File` borrowed for the call.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result != -1 { Ok(()) } else { Err(io::Error::last_os_error()) }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    {
        file.sync_data()
    }
}

/// Make a rename or unlink inside `dir` durable.
fn sync_dir(dir: &Path) -> StoreResult<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|e| StoreError::io(dir, "open directory for sync", e))?;
        durable_sync(&handle).map_err(|e| StoreError::io(dir, "sync directory", e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn file_name(generation: u64) -> String {
    format!("{}{:016x}{}", FILE_PREFIX, generation, FILE_SUFFIX)
}

fn parse_generation(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// Log files in `wal_dir`, ascending by generation.
fn list_log_files(wal_dir: &Path) -> StoreResult<Vec<(u64, PathBuf)>> {
    let dir_entries = fs::read_dir(wal_dir).map_err(|e| StoreError::io(wal_dir, "read log directory", e))?;

    let mut files = Vec::new();
    for entry in dir_entries {
        let entry = entry.map_err(|e| StoreError::io(wal_dir, "read directory entry", e))?;
        if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
            files.push((generation, entry.path()));
        }
    }
    files.sort_by_key(|(generation, _)| *generation);
    Ok(files)
}

fn file_len(path: &Path) -> StoreResult<u64> {
    Ok(fs::metadata(path)
        .map_err(|e| StoreError::io(path, "stat log file", e))?
        .len())
}

fn open_append(path: &Path) -> StoreResult<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, "open log file", e))?;
    let size = file
        .metadata()
        .map_err(|e| StoreError::io(path, "stat log file", e))?
        .len();
    Ok((file, size))
}

/// Appends records to the newest log file, rotating at a size threshold.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    size: u64,
    wal_dir: PathBuf,
    generation: u64,
    rotation_size: u64,
    /// Set when a rejected append could not be cut back out of the file
    poisoned: Option<String>,
    #[cfg(test)]
    fail_sync: bool,
}

impl LogWriter {
    /// Open the writer on the newest generation if it is still empty, else on
    /// a fresh one after it, so nothing is ever appended behind a torn tail
    /// left by a crash.
    pub fn open(wal_dir: &Path, rotation_size: u64) -> StoreResult<Self> {
        fs::create_dir_all(wal_dir).map_err(|e| StoreError::io(wal_dir, "create log directory", e))?;

        let generation = match list_log_files(wal_dir)?.last() {
            Some((generation, path)) if file_len(path)? == 0 => *generation,
            Some((generation, _)) => generation + 1,
            None => 0,
        };
        let path = wal_dir.join(file_name(generation));
        let (file, size) = open_append(&path)?;

        Ok(Self {
            file,
            path,
            size,
            wal_dir: wal_dir.to_path_buf(),
            generation,
            rotation_size,
            poisoned: None,
            #[cfg(test)]
            fail_sync: false,
        })
    }

    /// Append already-encoded records, syncing them when `durable`. Rotation
    /// happens between appends so a single call never straddles two files.
    ///
    /// A failed write or sync is cut back out of the file, so a rejected
    /// append never replays. If the cut fails too, the writer refuses every
    /// later append.
    pub fn append(&mut self, bytes: &[u8], durable: bool) -> StoreResult<()> {
        if let Some(reason) = &self.poisoned {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        if self.size > 0 && self.size + bytes.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        let start = self.size;
        let appended = self
            .file
            .write_all(bytes)
            .map_err(|e| StoreError::io(&self.path, "append to log", e))
            .and_then(|()| if durable { self.sync() } else { Ok(()) });
        if let Err(err) = appended {
            self.roll_back(start);
            return Err(err);
        }
        self.size += bytes.len() as u64;
        Ok(())
    }

    fn roll_back(&mut self, len: u64) {
        let cut = self.file.set_len(len).and_then(|()| durable_sync(&self.file));
        if let Err(err) = cut {
            tracing::error!(path = %self.path.display(), error = %err, "cannot remove rejected append, refusing further writes");
            self.poisoned = Some(format!(
                "log {} holds a rejected append: {}",
                self.path.display(),
                err
            ));
        }
    }

    pub fn sync(&self) -> StoreResult<()> {
        #[cfg(test)]
        if self.fail_sync {
            return Err(StoreError::io(
                &self.path,
                "sync log",
                io::Error::new(io::ErrorKind::Other, "injected sync failure"),
            ));
        }
        durable_sync(&self.file).map_err(|e| StoreError::io(&self.path, "sync log", e))
    }

    /// Sync the current file and continue in a new generation.
    fn rotate(&mut self) -> StoreResult<()> {
        self.rotate_to(self.generation + 1)
    }

    /// Sync the current file and continue in `generation`, leaving any
    /// generations in between free.
    fn rotate_to(&mut self, generation: u64) -> StoreResult<()> {
        self.sync()?;
        self.switch_to(generation)
    }

    fn switch_to(&mut self, generation: u64) -> StoreResult<()> {
        let path = self.wal_dir.join(file_name(generation));
        let (file, size) = open_append(&path)?;
        tracing::debug!(path = %path.display(), "switched log file");
        self.file = file;
        self.path = path;
        self.size = size;
        self.generation = generation;
        Ok(())
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Replays log files for recovery.
pub struct LogReader {
    wal_dir: PathBuf,
}

impl LogReader {
    pub fn new(wal_dir: &Path) -> Self {
        Self { wal_dir: wal_dir.to_path_buf() }
    }

    /// All recoverable records across every log file, in write order.
    ///
    /// Per file: a record with a bad magic or checksum is skipped by scanning
    /// for the next magic; a record cut off at the end of the file is the
    /// crash point and ends that file.
    pub fn records(&self) -> StoreResult<Vec<Record>> {
        let mut records = Vec::new();
        for (_, path) in list_log_files(&self.wal_dir)? {
            records.extend(Self::records_in(&path)?);
        }
        Ok(records)
    }

    fn records_in(path: &Path) -> StoreResult<Vec<Record>> {
        let buf = fs::read(path).map_err(|e| StoreError::io(path, "read log file", e))?;

        let mut records = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            match decode_record(&buf, offset, path) {
                Decoded::Record(record, len) => {
                    records.push(record);
                    offset += len;
                }
                Decoded::Truncated(err) => {
                    tracing::warn!(%err, "log ends in a partial record, ignoring the tail");
                    break;
                }
                Decoded::Invalid(err) => {
                    tracing::warn!(%err, "skipping corrupt log record");
                    match find_next_magic(&buf, offset + 1) {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
        }
        Ok(records)
    }
}

/// File-backed [`DurableBackingStore`].
pub struct WalStore {
    writer: LogWriter,
    wal_dir: PathBuf,
    sync_mode: SyncMode,
    next_sequence: u64,
    /// Records appended since the last compaction (approximate after rotation)
    records: u64,
    scratch: Vec<u8>,
    #[cfg(test)]
    fail_retire: bool,
}

impl WalStore {
    /// Open or create a log store rooted at `dir`.
    pub fn open(dir: &Path, sync_mode: SyncMode, rotation_size: u64) -> StoreResult<Self> {
        let wal_dir = dir.join("wal");
        let writer = LogWriter::open(&wal_dir, rotation_size)?;

        let records = LogReader::new(&wal_dir).records()?;
        let next_sequence = records
            .iter()
            .map(|r| r.sequence.saturating_add(1))
            .max()
            .unwrap_or(1);

        Ok(Self {
            writer,
            wal_dir,
            sync_mode,
            next_sequence,
            records: records.len() as u64,
            scratch: Vec::new(),
            #[cfg(test)]
            fail_retire: false,
        })
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Path of the file currently receiving appends.
    pub fn current_path(&self) -> &Path {
        self.writer.current_path()
    }

    fn append(&mut self, batch: &[Mutation<'_>]) -> StoreResult<()> {
        self.scratch.clear();
        let mut sequence = self.next_sequence;
        for mutation in batch {
            match *mutation {
                Mutation::Put { key, value } => {
                    encode_record(&mut self.scratch, sequence, Operation::Put, key, value)?
                }
                Mutation::Delete { key } => {
                    encode_record(&mut self.scratch, sequence, Operation::Delete, key, &[])?
                }
            }
            sequence = sequence.saturating_add(1);
        }

        self.writer.append(&self.scratch, self.sync_mode == SyncMode::Durable)?;
        self.next_sequence = sequence;
        self.records += batch.len() as u64;
        Ok(())
    }

    fn log_bytes(&self) -> StoreResult<u64> {
        let mut total = 0;
        for (_, path) in list_log_files(&self.wal_dir)? {
            total += file_len(&path)?;
        }
        Ok(total)
    }

    /// Publish `snapshot` as `generation` through a synced temp file and an
    /// atomic rename.
    fn install_snapshot(&self, generation: u64, snapshot: &[u8]) -> StoreResult<()> {
        let final_path = self.wal_dir.join(file_name(generation));
        let temp_path = final_path.with_extension("tlog.compact");
        {
            let mut temp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| StoreError::io(&temp_path, "create compaction file", e))?;
            temp.write_all(snapshot)
                .map_err(|e| StoreError::io(&temp_path, "write compaction file", e))?;
            durable_sync(&temp).map_err(|e| StoreError::io(&temp_path, "sync compaction file", e))?;
        }
        fs::rename(&temp_path, &final_path)
            .map_err(|e| StoreError::io(&final_path, "install compaction file", e))?;
        sync_dir(&self.wal_dir)
    }

    /// Remove every generation older than `generation`.
    fn retire_before(&self, generation: u64) -> StoreResult<()> {
        #[cfg(test)]
        if self.fail_retire {
            return Err(StoreError::Unavailable("injected retire failure".into()));
        }
        for (old_generation, path) in list_log_files(&self.wal_dir)? {
            if old_generation < generation {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, "remove compacted log", e))?;
            }
        }
        sync_dir(&self.wal_dir)
    }
}

impl DurableBackingStore for WalStore {
    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.append(&[Mutation::Put { key, value }])
    }

    fn mark_deleted(&mut self, key: &[u8]) -> StoreResult<()> {
        self.append(&[Mutation::Delete { key }])
    }

    /// One append and one sync for the whole batch.
    fn write_batch(&mut self, batch: &[Mutation<'_>]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.append(batch)
    }

    fn read_all(&self) -> StoreResult<Vec<Entry>> {
        let mut latest: HashMap<Vec<u8>, Slot> = HashMap::new();
        for record in LogReader::new(&self.wal_dir).records()? {
            let slot = match record.op {
                Operation::Put => Slot::Value(record.value),
                Operation::Delete => Slot::Tombstone,
            };
            latest.insert(record.key, slot);
        }
        Ok(latest.into_iter().map(|(key, slot)| Entry { key, slot }).collect())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.writer.sync()
    }

    /// Rewrite the log as a single fresh generation holding one record per
    /// live key, then drop every older generation.
    ///
    /// The writer first moves two generations ahead, leaving a slot for the
    /// snapshot in between. Whichever later step fails, appends already land
    /// after the snapshot in replay order. The snapshot only appears through
    /// an atomic rename of a fully synced temp file, and until the old files
    /// are removed replay sees the old history followed by the snapshot,
    /// which yields the same state.
    fn compact(&mut self, live: &[(&[u8], &[u8])]) -> StoreResult<CompactionReport> {
        let records_before = self.records;
        let bytes_before = self.log_bytes()?;

        let mut snapshot = Vec::new();
        let mut sequence = self.next_sequence;
        for (key, value) in live {
            encode_record(&mut snapshot, sequence, Operation::Put, key, value)?;
            sequence = sequence.saturating_add(1);
        }

        let snapshot_generation = self.writer.generation() + 1;
        self.writer.rotate_to(snapshot_generation + 1)?;
        self.next_sequence = sequence;

        self.install_snapshot(snapshot_generation, &snapshot)?;
        self.retire_before(snapshot_generation)?;
        self.records = live.len() as u64;

        Ok(CompactionReport {
            records_before,
            records_after: self.records,
            bytes_before,
            bytes_after: snapshot.len() as u64,
        })
    }

    fn location(&self) -> String {
        self.wal_dir.display().to_string()
    }
}
