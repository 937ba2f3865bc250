//! Session State Store
//!
//! Durable "was connected" flag read by the shell at cold start.
//!
//! The in-memory phase owned by the session manager is authoritative; this
//! flag is written after each terminal transition and is only for display.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

/// Namespace the flag lives under
pub const STORE_NAMESPACE: &str = "vpn_prefs";

/// Key of the persisted flag
pub const CONNECTED_KEY: &str = "is_connected";

/// Errors that can occur while reading or writing the flag
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Single-key, last-writer-wins boolean store
pub trait StateStore: Send + Sync {
    /// Read the flag. A store that was never written reads `false`.
    fn load(&self) -> Result<bool, StoreError>;

    /// Replace the flag
    fn save(&self, connected: bool) -> Result<(), StoreError>;
}

/// On-disk layout of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    is_connected: bool,
}

/// JSON file store at `<dir>/vpn_prefs.json`
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store in `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        Ok(Self {
            path: dir.join(format!("{}.json", STORE_NAMESPACE)),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<bool, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_slice(&content)?;
        Ok(state.is_connected)
    }

    fn save(&self, connected: bool) -> Result<(), StoreError> {
        let data = serde_json::to_vec(&PersistedState {
            is_connected: connected,
        })?;

        // Write to temp file first, then rename over the old one
        let temp_path = self.path.with_extension("tmp");
        let written = write_synced(&temp_path, &data)
            .and_then(|()| fs::rename(&temp_path, &self.path));

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                debug!("Could not remove {}: {}", temp_path.display(), cleanup);
            }
            return Err(e.into());
        }

        debug!("Persisted {}={} to {}", CONNECTED_KEY, connected, self.path.display());
        Ok(())
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Volatile store for hosts without durable storage
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    connected: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<bool, StoreError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    fn save(&self, connected: bool) -> Result<(), StoreError> {
        self.connected.store(connected, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();

        // Never written
        assert!(!store.load().unwrap());

        store.save(true).unwrap();
        assert!(store.load().unwrap());

        store.save(false).unwrap();
        assert!(!store.load().unwrap());

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, r#"{"is_connected":false}"#);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        FileStateStore::new(dir.path()).unwrap().save(true).unwrap();

        let reopened = FileStateStore::new(dir.path()).unwrap();
        assert!(reopened.load().unwrap());
    }

    #[test]
    fn test_file_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        fs::write(store.path(), b"not json").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();

        // A directory in place of the state file makes the final rename fail
        fs::create_dir(store.path()).unwrap();
        fs::write(store.path().join("occupied"), b"x").unwrap();

        assert!(matches!(store.save(true), Err(StoreError::Io(_))));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        assert!(!store.load().unwrap());

        store.save(true).unwrap();
        assert!(store.load().unwrap());
    }
}
