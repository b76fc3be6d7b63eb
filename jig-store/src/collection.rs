//! Named key/value collections, optionally persisted to a JSON file.
//!
//! Every mutation snapshots the collection and writes it atomically: first
//! to a `.tmp` sibling, then renamed over the final path, so a crash
//! mid-write never corrupts stored state. A collection without a path lives
//! in memory only.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jig_core::JigError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Collection<V> {
    name: &'static str,
    entries: Arc<DashMap<String, V>>,
    path: Option<Arc<PathBuf>>,
    write_lock: Arc<Mutex<()>>,
}

impl<V> Collection<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Collection that is never written to disk.
    pub fn in_memory(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(DashMap::new()),
            path: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open a file-backed collection.
    ///
    /// * Missing file → empty collection (first run).
    /// * Malformed file → error; the file is left untouched.
    pub fn open(name: &'static str, path: impl Into<PathBuf>) -> Result<Self, JigError> {
        let path = path.into();
        let collection = Self {
            path: Some(Arc::new(path.clone())),
            ..Self::in_memory(name)
        };

        if !path.exists() {
            tracing::debug!(collection = name, path = %path.display(), "no state file found, starting fresh");
            return Ok(collection);
        }

        let data = std::fs::read_to_string(&path)?;
        let stored: BTreeMap<String, V> = serde_json::from_str(&data).map_err(|e| {
            JigError::Store(format!("{name}: malformed state file {}: {e}", path.display()))
        })?;
        let count = stored.len();
        for (k, v) in stored {
            collection.entries.insert(k, v);
        }

        tracing::info!(collection = name, entries = count, path = %path.display(), "state restored from file");
        Ok(collection)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Insert a new entry; `Conflict` if the key is taken.
    pub fn insert_new(&self, key: &str, value: V) -> Result<(), JigError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => {
                return Err(JigError::Conflict(format!("{} '{key}'", self.singular())));
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }

        if let Err(e) = self.save() {
            self.entries.remove(key);
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry, returning it if it existed.
    pub fn remove(&self, key: &str) -> Result<Option<V>, JigError> {
        let Some((k, v)) = self.entries.remove(key) else {
            return Ok(None);
        };
        if let Err(e) = self.save() {
            self.entries.insert(k, v);
            return Err(e);
        }
        Ok(Some(v))
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Values ordered by key.
    pub fn values(&self) -> Vec<V> {
        self.snapshot().into_values().collect()
    }

    pub fn find(&self, pred: impl Fn(&V) -> bool) -> Option<V> {
        self.entries
            .iter()
            .find(|e| pred(e.value()))
            .map(|e| e.value().clone())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self) -> BTreeMap<String, V> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn singular(&self) -> &str {
        self.name.strip_suffix('s').unwrap_or(self.name)
    }

    /// Write the current contents to disk. No-op for in-memory collections.
    fn save(&self) -> Result<(), JigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string_pretty(&self.snapshot())?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(collection = self.name, path = %path.display(), "state saved");
        Ok(())
    }
}
