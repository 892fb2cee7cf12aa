use std::path::PathBuf;

// on-disk file names, fixed relative to the working directory
const LOG_FILENAME: &str = "kv_store.log";
const SNAPSHOT_FILENAME: &str = "kv_store.snapshot";
const SNAPSHOT_TMP_FILENAME: &str = "kv_store.snapshot.tmp";

/// Configuration for a [`KvStore`].
///
/// [`KvStore`]: crate::KvStore
#[derive(Debug, Clone)]
pub struct Config {
    /// directory holding the log and snapshot files
    pub dir: PathBuf,

    /// table capacity at first start, clamped to at least 2 (default: 2, so
    /// resizing is exercised almost immediately)
    pub initial_capacity: usize,

    /// Bloom filter width in bits (default: 1000)
    pub bloom_bits: usize,

    /// Bloom filter hash derivations per key (default: 5)
    pub bloom_hashes: usize,

    /// mutating commands between snapshots, consumed by
    /// [`SnapshotPolicy`] (default: 10)
    ///
    /// [`SnapshotPolicy`]: crate::SnapshotPolicy
    pub snapshot_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            initial_capacity: 2,
            bloom_bits: 1000,
            bloom_hashes: 5,
            snapshot_interval: 10,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the table capacity used when starting without a snapshot
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the Bloom filter geometry
    pub fn bloom(mut self, bits: usize, hashes: usize) -> Self {
        self.bloom_bits = bits;
        self.bloom_hashes = hashes;
        self
    }

    /// Set how many mutating commands elapse between snapshots
    pub fn snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILENAME)
    }

    pub(crate) fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILENAME)
    }

    pub(crate) fn snapshot_tmp_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_TMP_FILENAME)
    }
}
