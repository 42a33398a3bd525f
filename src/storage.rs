//! Stand-in for the host chain database. The engine only ever needs
//! column-scoped get/put of opaque bytes; the real transport (RocksDB,
//! whatever the host node uses) is out of scope for this crate.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Minimal column-keyed byte store, modeled after `kvdb::KeyValueDB`.
pub trait KeyValueDB: Send + Sync {
    fn get(&self, col: &str, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, col: &str, key: &[u8], value: &[u8]);
}

/// In-memory double used by tests and by hosts that haven't wired up real
/// persistence yet.
#[derive(Default)]
pub struct MemoryDB {
    inner: RwLock<HashMap<(String, Vec<u8>), Vec<u8>>>,
}

impl MemoryDB {
    pub fn new() -> Self {
        MemoryDB::default()
    }
}

impl KeyValueDB for MemoryDB {
    fn get(&self, col: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(&(col.to_string(), key.to_vec())).cloned()
    }

    fn put(&self, col: &str, key: &[u8], value: &[u8]) {
        self.inner.write().insert((col.to_string(), key.to_vec()), value.to_vec());
    }
}

/// Injected wall clock so tests can drive time deterministically instead of
/// racing `SystemTime::now()`.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs()
    }
}

/// A clock that only advances when told to — used throughout the test suite.
pub struct TestClock(std::sync::atomic::AtomicU64);

impl TestClock {
    pub fn new(start: u64) -> Self {
        TestClock(std::sync::atomic::AtomicU64::new(start))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_unix(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
