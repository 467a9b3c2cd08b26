//! Per-(user, filename) reader/writer locks.
//!
//! Concurrent downloads of the same file should proceed in parallel; an upload or delete of
//! that file needs exclusive access. Locks are created on first use and reclaimed once the
//! last holder drops its handle — the `Arc` housing each lock is the refcount, so no
//! separate counter needs to be kept in sync with it.

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

type Key = (String, String);

enum Guard {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// RAII handle: holding one means the caller has the file locked. Dropping it releases the
/// lock and, if no other handle for the same key remains, removes the entry from the
/// registry.
pub struct FileLockHandle {
    _guard: Guard,
    release: ReleaseOnDrop,
}

struct ReleaseOnDrop {
    registry: Arc<FileLockRegistry>,
    key: Key,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

pub struct FileLockRegistry {
    entries: parking_lot::Mutex<HashMap<Key, Arc<RwLock<()>>>>,
}

impl FileLockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(FileLockRegistry {
            entries: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Acquire exclusive access, blocking until any readers or the current writer finish.
    pub fn acquire_write(self: &Arc<Self>, user: &str, filename: &str) -> FileLockHandle {
        let (key, entry) = self.get_or_create(user, filename);
        let guard = Guard::Write(entry.write_arc());
        FileLockHandle {
            _guard: guard,
            release: ReleaseOnDrop {
                registry: self.clone(),
                key,
            },
        }
    }

    /// Acquire shared access, blocking only while a writer holds the lock.
    pub fn acquire_read(self: &Arc<Self>, user: &str, filename: &str) -> FileLockHandle {
        let (key, entry) = self.get_or_create(user, filename);
        let guard = Guard::Read(entry.read_arc());
        FileLockHandle {
            _guard: guard,
            release: ReleaseOnDrop {
                registry: self.clone(),
                key,
            },
        }
    }

    fn get_or_create(&self, user: &str, filename: &str) -> (Key, Arc<RwLock<()>>) {
        let key = (user.to_string(), filename.to_string());
        let mut map = self.entries.lock();
        let entry = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        (key, entry)
    }

    /// Called once per handle drop. The registry's own copy of the `Arc` is the only one
    /// left exactly when `strong_count == 1`; this check and the removal happen under the
    /// same lock acquisition as `get_or_create`'s insert, so a concurrent acquire can never
    /// observe a half-removed entry.
    fn release(&self, key: &Key) {
        let mut map = self.entries.lock();
        if let Some(entry) = map.get(key) {
            if Arc::strong_count(entry) == 1 {
                map.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn entry_is_reclaimed_after_last_release() {
        let reg = FileLockRegistry::new();
        let a = reg.acquire_read("alice", "f.txt");
        let b = reg.acquire_read("alice", "f.txt");
        assert_eq!(reg.live_entries(), 1);
        drop(a);
        assert_eq!(reg.live_entries(), 1);
        drop(b);
        assert_eq!(reg.live_entries(), 0);
    }

    #[test]
    fn writer_excludes_readers() {
        let reg = FileLockRegistry::new();
        let w = reg.acquire_write("alice", "f.txt");
        let reg2 = reg.clone();
        let handle = thread::spawn(move || {
            let _r = reg2.acquire_read("alice", "f.txt");
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        drop(w);
        handle.join().unwrap();
    }

    #[test]
    fn distinct_files_do_not_contend() {
        let reg = FileLockRegistry::new();
        let _a = reg.acquire_write("alice", "a.txt");
        let _b = reg.acquire_write("alice", "b.txt");
        assert_eq!(reg.live_entries(), 2);
    }
}
