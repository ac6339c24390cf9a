use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{KvStore, StoreError};

const SNAPSHOT_FILE: &str = "snapshot.json";
const WAL_FILE: &str = "store.wal";

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    key: String,
    value: Value,
}

/// File-backed backend: the full key space lives in memory and every `set`
/// goes through the write-ahead log before it becomes visible.
#[derive(Debug)]
pub struct FileStore {
    base_path: PathBuf,
    entries: RwLock<HashMap<String, Value>>,
    wal: WriteAheadLog,
}

impl FileStore {
    /// Open (or create) a store rooted at `base_path`, loading the last
    /// snapshot and replaying the log on top of it.
    pub fn open(base_path: impl AsRef<Path>) -> io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let mut entries = load_snapshot(&base_path.join(SNAPSHOT_FILE))?;
        let wal = WriteAheadLog::new(&base_path)?;

        let (replayed, valid_len) = wal.replay()?;
        wal.trim_to(valid_len)?;
        let replay_count = replayed.len();
        for entry in replayed {
            entries.insert(entry.key, entry.value);
        }

        info!(
            path = %base_path.display(),
            keys = entries.len(),
            replayed = replay_count,
            "opened file store"
        );

        Ok(FileStore {
            base_path,
            entries: RwLock::new(entries),
            wal,
        })
    }

    /// Write the current key space to a fresh snapshot and truncate the log.
    pub fn compact(&self) -> Result<(), StoreError> {
        let entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        let snapshot_path = self.base_path.join(SNAPSHOT_FILE);
        let serialized = serde_json::to_vec(&*entries)?;

        // Write to a temporary file first
        let temp_path = snapshot_path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(io_unavailable)?;
        file.write_all(&serialized).map_err(io_unavailable)?;
        file.sync_all().map_err(io_unavailable)?;
        fs::rename(&temp_path, &snapshot_path).map_err(io_unavailable)?;

        self.wal.truncate().map_err(io_unavailable)?;
        info!(keys = entries.len(), "compacted file store");
        Ok(())
    }

    fn read_entries(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Value>>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn backend_tag(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        // Holding the map lock while logging keeps log order equal to apply order.
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;

        let entry = WalEntry {
            key: key.to_string(),
            value,
        };
        self.wal.append(&entry).map_err(io_unavailable)?;
        entries.insert(entry.key, entry.value);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, StoreError> {
        let entries = self.read_entries()?;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let entries = self.read_entries()?;
        let mut matches: Vec<(String, Value)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }
}

fn io_unavailable(error: io::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn load_snapshot(path: &Path) -> io::Result<HashMap<String, Value>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = fs::read(path)?;
    let entries = serde_json::from_slice(&bytes)?;
    Ok(entries)
}

/// Write-ahead log for crash recovery
#[derive(Debug)]
struct WriteAheadLog {
    log_path: PathBuf,
    log_file: Mutex<File>,
    /// Set when a failed append could not be cut back off the log.
    damaged: AtomicBool,
}

impl WriteAheadLog {
    fn new(dir: &Path) -> io::Result<Self> {
        let log_path = dir.join(WAL_FILE);
        let log_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;

        Ok(WriteAheadLog {
            log_path,
            log_file: Mutex::new(log_file),
            damaged: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.log_file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "wal lock poisoned"))
    }

    /// Append one entry: 4-byte big-endian size header followed by JSON.
    fn append(&self, entry: &WalEntry) -> io::Result<()> {
        let serialized = serde_json::to_vec(entry)?;
        let entry_size = u32::try_from(serialized.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "wal entry too large"))?;

        self.write_entry(|log_file| {
            log_file.write_all(&entry_size.to_be_bytes())?;
            log_file.write_all(&serialized)?;
            log_file.sync_data()
        })
    }

    /// Run `write` at the end of the log. A failed write is cut back off so
    /// a partial entry never sits in front of later ones; if that cut fails
    /// too, the log refuses appends until it is truncated by compaction.
    fn write_entry<F>(&self, write: F) -> io::Result<()>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        if self.damaged.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "wal holds a partial entry; compact or reopen the store",
            ));
        }

        let mut log_file = self.lock()?;
        let start_len = log_file.metadata()?.len();
        let Err(write_error) = write(&mut *log_file) else {
            return Ok(());
        };

        match log_file.set_len(start_len).and_then(|()| log_file.sync_data()) {
            Ok(()) => warn!(error = %write_error, len = start_len, "rolled back failed wal append"),
            Err(rollback_error) => {
                self.damaged.store(true, Ordering::SeqCst);
                error!(
                    error = %write_error,
                    rollback = %rollback_error,
                    "failed wal append could not be rolled back"
                );
            }
        }
        Err(write_error)
    }

    /// Decoded entries plus the byte length of the intact prefix of the log.
    fn replay(&self) -> io::Result<(Vec<WalEntry>, u64)> {
        let mut log_file = self.lock()?;
        log_file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut valid_len: u64 = 0;
        loop {
            let mut size_buf = [0u8; 4];
            match log_file.read_exact(&mut size_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let entry_size = u32::from_be_bytes(size_buf) as usize;
            let mut entry_data = vec![0u8; entry_size];
            match log_file.read_exact(&mut entry_data) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(recovered = entries.len(), "ignoring torn trailing wal entry");
                    break;
                }
                Err(e) => return Err(e),
            }

            match serde_json::from_slice::<WalEntry>(&entry_data) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_len += 4 + entry_size as u64;
                }
                Err(e) => {
                    warn!(error = %e, recovered = entries.len(), "stopping wal replay at undecodable entry");
                    break;
                }
            }
        }

        debug!(entries = entries.len(), "replayed wal");
        Ok((entries, valid_len))
    }

    /// Drop anything past the intact prefix so later appends stay readable.
    fn trim_to(&self, valid_len: u64) -> io::Result<()> {
        let log_file = self.lock()?;
        let current_len = log_file.metadata()?.len();
        if current_len > valid_len {
            warn!(current_len, valid_len, "trimming damaged wal tail");
            log_file.set_len(valid_len)?;
            log_file.sync_data()?;
        }
        Ok(())
    }

    fn truncate(&self) -> io::Result<()> {
        let new_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.log_path)?;
        drop(new_file);

        let reopened = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.log_path)?;
        let mut log_file = self.lock()?;
        *log_file = reopened;
        self.damaged.store(false, Ordering::SeqCst);
        Ok(())
    }
}
