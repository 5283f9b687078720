#![forbid(unsafe_code)]

//! Key/value storage with every application entry nested under one root key.
//!
//! The backends mirror browser session/local storage: flat string values
//! addressed by key. [`NamespacedStorage`] keeps a single JSON object under
//! its root key and never lets a backend failure escape: reads degrade to
//! "nothing stored" and writes are dropped with a warning.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

pub const SESSION_ROOT_KEY: &str = "newtube_session";
pub const LOCAL_ROOT_KEY: &str = "newtube_local";

pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local backend, the equivalent of a tab's session storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per root key inside a directory. Writes go through a
/// temporary file and a rename so a crash never leaves half a document.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            bail!("invalid storage key: {key:?}");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(raw))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, value).with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// Typed view over one root entry of a [`StorageBackend`].
pub struct NamespacedStorage {
    backend: Arc<dyn StorageBackend>,
    root_key: String,
    lock: Mutex<()>,
}

impl NamespacedStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, root_key: impl Into<String>) -> Self {
        Self {
            backend,
            root_key: root_key.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    pub fn get_item<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        let _guard = self.lock.lock();
        let value = self.load_root().remove(field)?;
        match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(root = %self.root_key, field, error = %err, "discarding unreadable storage item");
                None
            }
        }
    }

    pub fn set_item<T: Serialize>(&self, field: &str, item: &T) {
        let value = match serde_json::to_value(item) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(root = %self.root_key, field, error = %err, "failed to serialize storage item");
                return;
            }
        };
        let _guard = self.lock.lock();
        let mut root = self.load_root();
        root.insert(field.to_string(), value);
        self.store_root(&root);
    }

    pub fn remove_item(&self, field: &str) {
        let _guard = self.lock.lock();
        let mut root = self.load_root();
        if root.remove(field).is_some() {
            self.store_root(&root);
        }
    }

    /// Read-modify-write of one field under the namespace lock. `update`
    /// receives `None` when the field is missing or unreadable; returning
    /// `None` deletes the field.
    pub fn update_item<T, F>(&self, field: &str, update: F)
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let _guard = self.lock.lock();
        let mut root = self.load_root();
        let current = root
            .remove(field)
            .and_then(|value| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    tracing::warn!(root = %self.root_key, field, error = %err, "replacing unreadable storage item");
                    None
                }
            });
        if let Some(next) = update(current) {
            match serde_json::to_value(&next) {
                Ok(value) => {
                    root.insert(field.to_string(), value);
                }
                Err(err) => {
                    tracing::warn!(root = %self.root_key, field, error = %err, "failed to serialize storage item");
                    return;
                }
            }
        }
        self.store_root(&root);
    }

    /// Drops the whole namespace.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        if let Err(err) = self.backend.remove(&self.root_key) {
            tracing::warn!(root = %self.root_key, error = %err, "failed to clear storage");
        }
    }

    fn load_root(&self) -> Map<String, Value> {
        let raw = match self.backend.read(&self.root_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Map::new(),
            Err(err) => {
                tracing::warn!(root = %self.root_key, error = %err, "storage unavailable");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(root = %self.root_key, "ignoring corrupt storage root");
                Map::new()
            }
        }
    }

    fn store_root(&self, root: &Map<String, Value>) {
        let result = serde_json::to_string(root)
            .context("serializing storage root")
            .and_then(|raw| self.backend.write(&self.root_key, &raw));
        if let Err(err) = result {
            tracing::warn!(root = %self.root_key, error = %err, "failed to persist storage");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;

    /// Backend whose every call fails, like storage disabled by the browser.
    pub(crate) struct BrokenStorage;

    impl StorageBackend for BrokenStorage {
        fn read(&self, _key: &str) -> Result<Option<String>> {
            bail!("storage disabled")
        }

        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            bail!("quota exceeded")
        }

        fn remove(&self, _key: &str) -> Result<()> {
            bail!("storage disabled")
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        value: u32,
    }

    #[test]
    fn fields_share_a_single_root_entry() {
        let backend = Arc::new(MemoryStorage::new());
        let storage = NamespacedStorage::new(backend.clone(), SESSION_ROOT_KEY);
        storage.set_item("first", &Item { value: 1 });
        storage.set_item("second", &Item { value: 2 });

        let raw = backend.raw(SESSION_ROOT_KEY).unwrap();
        let root: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(root["first"]["value"], 1);
        assert_eq!(root["second"]["value"], 2);
        assert_eq!(backend.entries.lock().len(), 1);

        storage.remove_item("first");
        assert_eq!(storage.get_item::<Item>("first"), None);
        assert_eq!(storage.get_item::<Item>("second"), Some(Item { value: 2 }));
    }

    #[test]
    fn broken_backend_degrades_to_empty() {
        let storage = NamespacedStorage::new(Arc::new(BrokenStorage), SESSION_ROOT_KEY);
        storage.set_item("field", &Item { value: 3 });
        assert_eq!(storage.get_item::<Item>("field"), None);
        storage.remove_item("field");
        storage.clear();
    }

    #[test]
    fn corrupt_root_is_ignored_and_replaced() {
        let backend = Arc::new(MemoryStorage::new());
        backend.write(SESSION_ROOT_KEY, "{not json").unwrap();
        let storage = NamespacedStorage::new(backend.clone(), SESSION_ROOT_KEY);
        assert_eq!(storage.get_item::<Item>("field"), None);

        storage.set_item("field", &Item { value: 4 });
        assert_eq!(storage.get_item::<Item>("field"), Some(Item { value: 4 }));
    }

    #[test]
    fn mistyped_field_reads_as_missing() {
        let backend = Arc::new(MemoryStorage::new());
        backend
            .write(SESSION_ROOT_KEY, r#"{"field": {"value": "nope"}}"#)
            .unwrap();
        let storage = NamespacedStorage::new(backend, SESSION_ROOT_KEY);
        assert_eq!(storage.get_item::<Item>("field"), None);
    }

    #[test]
    fn update_item_can_insert_and_delete() {
        let storage = NamespacedStorage::new(Arc::new(MemoryStorage::new()), LOCAL_ROOT_KEY);
        storage.update_item::<Item, _>("field", |current| {
            assert!(current.is_none());
            Some(Item { value: 5 })
        });
        assert_eq!(storage.get_item::<Item>("field"), Some(Item { value: 5 }));
        storage.update_item::<Item, _>("field", |_| None);
        assert_eq!(storage.get_item::<Item>("field"), None);
    }

    #[test]
    fn file_storage_round_trips_documents() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorage::new(dir.path().join("state"));
        assert_eq!(backend.read("root").unwrap(), None);

        backend.write("root", "{\"a\":1}").unwrap();
        assert_eq!(backend.read("root").unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(dir.path().join("state/root.json").exists());

        backend.remove("root").unwrap();
        backend.remove("root").unwrap();
        assert_eq!(backend.read("root").unwrap(), None);
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileStorage::new(dir.path());
        assert!(backend.write("../escape", "{}").is_err());
        assert!(backend.read("").is_err());
    }
}
