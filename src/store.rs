use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, instrument};

use crate::bloom::BloomFilter;
use crate::command::Command;
use crate::config::Config;
use crate::error::{KvError, Result};
use crate::snapshot;
use crate::table::Table;
use crate::wal::Wal;

/// The primary struct for working with the store: a durable, hash-indexed
/// key-value map shared between client threads.
///
/// Every mutating command is appended to a write-ahead log before the
/// in-memory table changes, and [`create_snapshot`] periodically folds the
/// log into a binary full-state image. On startup the store rebuilds itself
/// from the snapshot plus the surviving log tail, so restarts lose nothing
/// that was acknowledged.
///
/// A `KvStore` is a cheap [`Clone`]: hand one clone to each connection
/// thread. One coarse lock serializes all operations across clones.
///
/// # Example
/// ```rust
/// use hashkv::KvStore;
/// # fn main() -> hashkv::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let store = KvStore::open(dir.path())?;
/// store.set("foo".to_string(), "bar".to_string())?;
/// assert_eq!(store.get("foo".to_string())?, Some("bar".to_string()));
/// assert!(store.del("foo".to_string())?);
/// # Ok(())
/// # }
/// ```
///
/// [`create_snapshot`]: KvStore::create_snapshot
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<Mutex<Inner>>,
}

/// everything the coarse lock guards: the table, its Bloom filter, and the
/// log handle move together
struct Inner {
    table: Table,
    bloom: BloomFilter,
    wal: Wal,
    config: Config,
}

impl KvStore {
    /// opens (or creates) a store persisted in `dir` with the default
    /// configuration, running recovery first
    ///
    /// # Errors
    /// fails when the directory or log file cannot be opened, or when an
    /// existing snapshot cannot be decoded
    pub fn open(dir: impl Into<PathBuf>) -> Result<KvStore> {
        KvStore::with_config(Config::new(dir))
    }

    /// opens (or creates) the store described by `config`.
    ///
    /// Recovery order: an existing snapshot is loaded and the log tail
    /// replayed on top of it; with no snapshot the whole log is replayed
    /// into a fresh table; with neither the store starts empty. The log is
    /// opened for appending only after recovery has finished reading it.
    #[instrument]
    pub fn with_config(config: Config) -> Result<KvStore> {
        fs::create_dir_all(&config.dir)?;
        let table = recover(&config)?;

        // the filter is not persisted; re-register every recovered key
        let mut bloom = BloomFilter::new(config.bloom_bits, config.bloom_hashes);
        for (key, _) in table.iter() {
            bloom.add(key);
        }

        let wal = Wal::open(config.log_path())?;
        info!(keys = table.len(), capacity = table.capacity(), "store ready");

        Ok(KvStore {
            inner: Arc::new(Mutex::new(Inner {
                table,
                bloom,
                wal,
                config,
            })),
        })
    }

    /// inserts the specified `key` and `value`, overriding any existing
    /// entry. The command is logged and flushed before the table changes.
    pub fn set(&self, key: String, value: String) -> Result<()> {
        let mut inner = self.lock()?;
        let command = Command::Set { key, value };
        inner.wal.append(&command)?;

        if let Command::Set { key, value } = command {
            inner.bloom.add(&key);
            let capacity = inner.table.capacity();
            inner.table.insert(key, value);
            if inner.table.capacity() != capacity {
                // the rehash dropped the tombstones, so stale keys no longer
                // need to keep testing positive
                inner.rebuild_bloom();
            }
        }
        Ok(())
    }

    /// retrieves the value associated with `key`, or `None` when absent.
    /// The Bloom filter rejects most true misses without probing the table.
    pub fn get(&self, key: String) -> Result<Option<String>> {
        let inner = self.lock()?;
        if !inner.bloom.contains(&key) {
            return Ok(None);
        }
        Ok(inner.table.get(&key).map(String::from))
    }

    /// removes `key`, returning whether a live entry was removed.
    ///
    /// The command is logged first either way: the log records intent, and
    /// replaying a delete of an absent key is a no-op.
    pub fn del(&self, key: String) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.wal.append(&Command::Del { key: key.clone() })?;
        if !inner.bloom.contains(&key) {
            return Ok(false);
        }
        Ok(inner.table.remove(&key))
    }

    /// serializes the whole table to disk and compacts the log.
    ///
    /// The image commits via an atomic rename *before* the log is
    /// truncated; a crash between the two steps only leaves stale records
    /// whose effects the snapshot already holds. If writing the image
    /// fails, the previous snapshot and the uncompacted log are left
    /// intact and the store keeps serving.
    pub fn create_snapshot(&self) -> Result<()> {
        let mut inner = self.lock()?;
        snapshot::write(
            &inner.table,
            &inner.config.snapshot_path(),
            &inner.config.snapshot_tmp_path(),
        )?;
        inner.wal.truncate()?;
        info!(keys = inner.table.len(), "snapshot created and log compacted");
        Ok(())
    }

    /// number of live keys in the store
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.table.len())
    }

    /// true when the store holds no live keys
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.table.len() == 0)
    }

    /// current capacity of the underlying table
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.lock()?.table.capacity())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| KvError::Locking("store mutex poisoned".to_string()))
    }
}

impl Inner {
    /// rebuilds the Bloom filter from the table's live keys, with the same
    /// geometry, after a resize has discarded tombstones
    fn rebuild_bloom(&mut self) {
        let mut bloom = BloomFilter::new(self.config.bloom_bits, self.config.bloom_hashes);
        for (key, _) in self.table.iter() {
            bloom.add(key);
        }
        self.bloom = bloom;
    }
}

/// recovery as a pure function of the on-disk state: decode the snapshot if
/// one exists, then apply the surviving log records through the raw,
/// non-logging mutation path
fn recover(config: &Config) -> Result<Table> {
    let mut table = match snapshot::read(&config.snapshot_path())? {
        Some(table) => {
            info!(keys = table.len(), capacity = table.capacity(), "loaded snapshot");
            table
        }
        None => {
            info!("no snapshot found, replaying log from the start");
            Table::with_capacity(config.initial_capacity)
        }
    };

    // compaction empties the log when a snapshot commits, so every record
    // still in it postdates the snapshot loaded above
    for command in Wal::replay(&config.log_path())? {
        match command {
            Command::Set { key, value } => {
                table.insert(key, value);
            }
            Command::Del { key } => {
                table.remove(&key);
            }
        }
    }
    Ok(table)
}

/// The snapshot trigger policy: a per-process atomic counter of mutating
/// commands, advanced by the request-handling boundary.
///
/// [`record_write`] returns true every `interval`-th write, at which point
/// the caller invokes [`KvStore::create_snapshot`]. The counter counts
/// *attempted* mutations, so the trigger is an approximate policy rather
/// than an exact per-N guarantee.
///
/// [`record_write`]: SnapshotPolicy::record_write
#[derive(Debug)]
pub struct SnapshotPolicy {
    interval: u64,
    writes: AtomicU64,
}

impl SnapshotPolicy {
    /// a policy that fires every `interval` mutating commands; an interval
    /// of zero never fires
    pub fn new(interval: u64) -> SnapshotPolicy {
        SnapshotPolicy {
            interval,
            writes: AtomicU64::new(0),
        }
    }

    /// counts one mutating command, returning true when a snapshot is due
    pub fn record_write(&self) -> bool {
        let count = self.writes.fetch_add(1, Ordering::Relaxed);
        self.interval != 0 && count > 0 && count % self.interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::thread;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn open_in(dir: &tempfile::TempDir) -> KvStore {
        KvStore::open(dir.path()).expect("store should open")
    }

    #[test]
    fn set_get_del_basics() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        store.set("foo".to_string(), "bar".to_string()).unwrap();
        assert_eq!(store.get("foo".to_string()).unwrap(), Some("bar".to_string()));
        assert_eq!(store.get("baz".to_string()).unwrap(), None);

        store.set("a".to_string(), "1".to_string()).unwrap();
        store.set("b".to_string(), "2".to_string()).unwrap();
        store.set("c".to_string(), "3".to_string()).unwrap();
        assert!(store.del("b".to_string()).unwrap());
        assert_eq!(store.get("b".to_string()).unwrap(), None);
        assert!(!store.del("b".to_string()).unwrap());
        assert_eq!(store.get("a".to_string()).unwrap(), Some("1".to_string()));
        assert_eq!(store.get("c".to_string()).unwrap(), Some("3".to_string()));
    }

    #[test]
    fn overwrite_preserves_size() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        store.set("foo".to_string(), "1".to_string()).unwrap();
        let len = store.len().unwrap();
        store.set("foo".to_string(), "2".to_string()).unwrap();
        assert_eq!(store.get("foo".to_string()).unwrap(), Some("2".to_string()));
        assert_eq!(store.len().unwrap(), len);
    }

    #[test]
    fn hundred_keys_grow_from_initial_capacity() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        for i in 0..100 {
            store.set(format!("k{}", i), format!("v{}", i)).unwrap();
        }
        assert_eq!(store.len().unwrap(), 100);
        let capacity = store.capacity().unwrap();
        assert!(capacity as f64 * 0.7 >= 100.0);
        assert!(capacity.is_power_of_two());
        for i in 0..100 {
            assert_eq!(
                store.get(format!("k{}", i)).unwrap(),
                Some(format!("v{}", i))
            );
        }
    }

    #[test]
    fn restart_recovers_from_log_alone() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_in(&dir);
            store.set("a".to_string(), "1".to_string()).unwrap();
            store.set("b".to_string(), "2".to_string()).unwrap();
            store.set("a".to_string(), "3".to_string()).unwrap();
            store.del("b".to_string()).unwrap();
        }

        let store = open_in(&dir);
        assert_eq!(store.get("a".to_string()).unwrap(), Some("3".to_string()));
        assert_eq!(store.get("b".to_string()).unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.del("b".to_string()).unwrap());
    }

    #[test]
    fn restart_recovers_from_snapshot_plus_log_tail() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_in(&dir);
            for i in 0..20 {
                store.set(format!("k{}", i), format!("v{}", i)).unwrap();
            }
            store.create_snapshot().unwrap();
            // these land in the log only, after the snapshot
            store.set("late".to_string(), "yes".to_string()).unwrap();
            store.del("k3".to_string()).unwrap();
        }

        let store = open_in(&dir);
        assert_eq!(store.get("late".to_string()).unwrap(), Some("yes".to_string()));
        assert_eq!(store.get("k3".to_string()).unwrap(), None);
        assert_eq!(store.get("k7".to_string()).unwrap(), Some("v7".to_string()));
        assert_eq!(store.len().unwrap(), 20);
    }

    #[test]
    fn record_logged_after_snapshot_survives_crash() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_in(&dir);
            store.set("a".to_string(), "1".to_string()).unwrap();
            store.create_snapshot().unwrap();
        }

        // simulate a crash that appended to the log but never applied in a
        // surviving process
        let mut log = OpenOptions::new()
            .append(true)
            .open(dir.path().join("kv_store.log"))
            .unwrap();
        writeln!(log, "set x 9").unwrap();
        drop(log);

        let store = open_in(&dir);
        assert_eq!(store.get("x".to_string()).unwrap(), Some("9".to_string()));
        assert_eq!(store.get("a".to_string()).unwrap(), Some("1".to_string()));
    }

    #[test]
    fn snapshot_compacts_the_log() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        for i in 0..10 {
            store.set(format!("k{}", i), "v".to_string()).unwrap();
        }
        let log_path = dir.path().join("kv_store.log");
        assert!(fs::metadata(&log_path).unwrap().len() > 0);

        store.create_snapshot().unwrap();
        assert!(dir.path().join("kv_store.snapshot").exists());
        assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);

        // compaction is idempotent: snapshotting again changes nothing
        // observable
        store.create_snapshot().unwrap();
        assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);
        drop(store);

        let store = open_in(&dir);
        assert_eq!(store.len().unwrap(), 10);
        assert_eq!(store.get("k9".to_string()).unwrap(), Some("v".to_string()));
    }

    #[test]
    fn corrupt_snapshot_fails_startup() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kv_store.snapshot"), b"not a snapshot").unwrap();
        match KvStore::open(dir.path()) {
            Err(KvError::Corruption(_)) => {}
            other => panic!("expected corruption error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn concurrent_writers_share_one_store() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    store
                        .set(format!("t{}k{}", t, i), format!("v{}", i))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 100);
        for t in 0..4 {
            for i in 0..25 {
                assert_eq!(
                    store.get(format!("t{}k{}", t, i)).unwrap(),
                    Some(format!("v{}", i))
                );
            }
        }
    }

    #[test]
    fn policy_fires_every_interval() {
        let policy = SnapshotPolicy::new(10);
        let fired: Vec<i32> = (0..25).filter(|_| policy.record_write()).collect();
        // pre-increment counts 0..24 fire at 10 and 20: the 11th and 21st
        // observed writes
        assert_eq!(fired.len(), 2);

        let never = SnapshotPolicy::new(0);
        assert!((0..10).all(|_| !never.record_write()));
    }

    #[test]
    fn twelve_writes_at_interval_ten_leave_two_log_records() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);
        let policy = SnapshotPolicy::new(10);

        for i in 0..12 {
            if policy.record_write() {
                store.create_snapshot().unwrap();
            }
            store.set(format!("k{}", i), format!("v{}", i)).unwrap();
        }

        assert!(dir.path().join("kv_store.snapshot").exists());
        let log = fs::read_to_string(dir.path().join("kv_store.log")).unwrap();
        assert_eq!(log.lines().count(), 2, "log: {:?}", log);
        drop(store);

        let store = open_in(&dir);
        for i in 0..12 {
            assert_eq!(
                store.get(format!("k{}", i)).unwrap(),
                Some(format!("v{}", i))
            );
        }
    }
}
