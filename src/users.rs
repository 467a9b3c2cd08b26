//! User accounts: quota, catalog, and the per-user mutex that guards both.

use crate::error::ErrReason;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One file's entry in a user's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

struct UserState {
    quota_bytes: u64,
    used_bytes: u64,
    catalog: Vec<FileEntry>,
}

/// A single account. `quota_bytes`, `used_bytes`, and `catalog` are always touched together
/// under one lock acquisition so a quota check and the catalog update it governs never race.
pub struct User {
    username: String,
    state: Mutex<UserState>,
}

impl User {
    fn new(username: &str, quota_bytes: u64) -> Self {
        User {
            username: username.to_string(),
            state: Mutex::new(UserState {
                quota_bytes,
                used_bytes: 0,
                catalog: Vec::new(),
            }),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check quota, rename the already-written temp file into place, and update the
    /// catalog, all under one lock hold so no other upload for this user can be admitted
    /// between the check and the commit.
    pub fn commit_upload(
        &self,
        name: &str,
        filesize: u64,
        temp_path: &Path,
        final_path: &Path,
    ) -> Result<(), ErrReason> {
        let mut state = self.state.lock();
        let prev_size = state
            .catalog
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.size)
            .unwrap_or(0);
        if state.used_bytes - prev_size + filesize > state.quota_bytes {
            return Err(ErrReason::QuotaExceeded);
        }
        fs::rename(temp_path, final_path).map_err(|_| ErrReason::RenameFailed)?;
        match state.catalog.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.size = filesize,
            None => state.catalog.push(FileEntry {
                name: name.to_string(),
                size: filesize,
            }),
        }
        state.used_bytes = state.used_bytes - prev_size + filesize;
        Ok(())
    }

    /// Remove a catalog entry, returning its size if it existed. Presence is decided by
    /// catalog membership, not by the file's on-disk size, so a legitimately empty file is
    /// still deletable.
    pub fn remove_entry(&self, name: &str) -> Option<u64> {
        let mut state = self.state.lock();
        let idx = state.catalog.iter().position(|e| e.name == name)?;
        let entry = state.catalog.remove(idx);
        state.used_bytes -= entry.size;
        Some(entry.size)
    }

    pub fn list(&self) -> Vec<FileEntry> {
        self.state.lock().catalog.clone()
    }

    /// Seed a catalog entry directly, used when rehydrating from files already on disk.
    fn seed(&self, name: &str, size: u64) {
        let mut state = self.state.lock();
        state.catalog.push(FileEntry {
            name: name.to_string(),
            size,
        });
        state.used_bytes += size;
    }
}

/// All known accounts, keyed by username, plus the storage root their files live under.
pub struct UserRegistry {
    storage_root: PathBuf,
    default_quota: u64,
    users: Mutex<HashMap<String, Arc<User>>>,
}

impl UserRegistry {
    pub fn new(storage_root: impl Into<PathBuf>, default_quota: u64) -> Self {
        UserRegistry {
            storage_root: storage_root.into(),
            default_quota,
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Create a brand-new account. The per-user directory is created after the registry
    /// lock is released, so directory creation never happens while other lookups are
    /// blocked on it.
    pub fn create(&self, username: &str) -> Result<(), ErrReason> {
        let mut guard = self.users.lock();
        if guard.contains_key(username) {
            return Err(ErrReason::UserExists);
        }
        guard.insert(
            username.to_string(),
            Arc::new(User::new(username, self.default_quota)),
        );
        drop(guard);
        let _ = fs::create_dir_all(self.storage_root.join(username));
        Ok(())
    }

    pub fn find(&self, username: &str) -> Option<Arc<User>> {
        self.users.lock().get(username).cloned()
    }

    /// Rebuild accounts and catalogs from whatever is already on disk under the storage
    /// root, so restarting the service doesn't forget existing users or files. Any leftover
    /// `.tmp_*` files from an upload that never committed are discarded.
    pub fn rehydrate(&self) -> io::Result<()> {
        if !self.storage_root.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.storage_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let username = entry.file_name().to_string_lossy().into_owned();
            let mut guard = self.users.lock();
            let user = guard
                .entry(username.clone())
                .or_insert_with(|| Arc::new(User::new(&username, self.default_quota)))
                .clone();
            drop(guard);
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let name = file.file_name().to_string_lossy().into_owned();
                if name.starts_with(".tmp_") {
                    let _ = fs::remove_file(file.path());
                    continue;
                }
                if file.file_type()?.is_file() {
                    let size = file.metadata()?.len();
                    user.seed(&name, size);
                }
            }
        }
        Ok(())
    }
}
