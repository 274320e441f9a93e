//! JSON file-backed store.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{SessionError, SessionResult};
use crate::storage::KeyValueStore;

/// A store persisted as one JSON object on disk.
///
/// Every write rewrites the file through a temporary sibling and a rename, so
/// a crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store, loading existing entries if the file exists.
    ///
    /// An unreadable document is logged and replaced by an empty store rather
    /// than failing start-up.
    pub fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        if path.exists() {
            let file = File::open(&path).map_err(|e| SessionError::Storage(e.to_string()))?;
            match serde_json::from_reader::<_, HashMap<String, String>>(BufReader::new(file)) {
                Ok(map) => entries = map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable store file");
                }
            }
            tracing::info!(path = %path.display(), entries = entries.len(), "Loaded session store");
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, String>) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SessionError::Storage(e.to_string()))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let file = File::create(&tmp).map_err(|e| SessionError::Storage(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entries)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        writer.flush().map_err(|e| SessionError::Storage(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| SessionError::Storage(e.to_string()))
    }

    fn lock(&self) -> SessionResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SessionError::Storage("store mutex poisoned".into()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> SessionResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> SessionResult<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> SessionResult<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("session-store-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_persistence() {
        let path = temp_path();

        let store = FileStore::open(&path).unwrap();
        store.put("user_data:42", "{\"x\":1}".into()).unwrap();
        store.put("session:credential", "secret".into()).unwrap();
        store.remove("session:credential").unwrap();

        // Load new instance
        let loaded = FileStore::open(&path).unwrap();
        assert_eq!(loaded.get("user_data:42").unwrap().as_deref(), Some("{\"x\":1}"));
        assert!(loaded.get("session:credential").unwrap().is_none());

        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let path = temp_path();
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get("anything").unwrap().is_none());

        fs::remove_file(&path).unwrap_or_default();
    }
}
