use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{RuntimeError, RuntimeResult};
use crate::models::Highlight;
use crate::utils::scheduler::lock;

/// Local-storage key holding every attempt's highlights.
pub const HIGHLIGHTS_KEY: &str = "text-highlights";

/// `attempt_id -> section_name -> highlights`
pub type HighlightMap = BTreeMap<String, BTreeMap<String, Vec<Highlight>>>;

/// String key/value persistence with `localStorage` semantics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> RuntimeResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RuntimeResult<()>;
    fn remove(&self, key: &str) -> RuntimeResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> RuntimeResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RuntimeResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> RuntimeResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> RuntimeResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RuntimeError::Store(format!("read {}: {}", key, e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> RuntimeResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| RuntimeError::Store(format!("create {:?}: {}", self.dir, e)))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| RuntimeError::Store(format!("write {}: {}", key, e)))
    }

    fn remove(&self, key: &str) -> RuntimeResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::Store(format!("remove {}: {}", key, e))),
        }
    }
}

/// Reads and writes the nested highlight map under [`HIGHLIGHTS_KEY`].
#[derive(Clone)]
pub struct HighlightRepository {
    store: Arc<dyn KeyValueStore>,
}

impl HighlightRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Unreadable or corrupt state loads as empty.
    pub fn load_all(&self) -> HighlightMap {
        let raw = match self.store.get(HIGHLIGHTS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return HighlightMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read persisted highlights: {}", e);
                return HighlightMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("Discarding corrupt highlight state: {}", e);
            HighlightMap::new()
        })
    }

    fn write_all(&self, map: &HighlightMap) -> RuntimeResult<()> {
        if map.is_empty() {
            return self.store.remove(HIGHLIGHTS_KEY);
        }
        let raw = serde_json::to_string(map)?;
        self.store.set(HIGHLIGHTS_KEY, &raw)
    }

    pub fn load(&self, attempt_id: &str, section_name: &str) -> Vec<Highlight> {
        self.load_all()
            .get(attempt_id)
            .and_then(|sections| sections.get(section_name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn append(
        &self,
        attempt_id: &str,
        section_name: &str,
        highlight: Highlight,
    ) -> RuntimeResult<()> {
        let mut map = self.load_all();
        map.entry(attempt_id.to_string())
            .or_default()
            .entry(section_name.to_string())
            .or_default()
            .push(highlight);
        self.write_all(&map)
    }

    /// Replaces one section's list. Empty lists and attempts are pruned.
    pub fn replace(
        &self,
        attempt_id: &str,
        section_name: &str,
        highlights: Vec<Highlight>,
    ) -> RuntimeResult<()> {
        let mut map = self.load_all();
        if highlights.is_empty() {
            if let Some(sections) = map.get_mut(attempt_id) {
                sections.remove(section_name);
                if sections.is_empty() {
                    map.remove(attempt_id);
                }
            }
        } else {
            map.entry(attempt_id.to_string())
                .or_default()
                .insert(section_name.to_string(), highlights);
        }
        self.write_all(&map)
    }

    pub fn clear_attempt(&self, attempt_id: &str) -> RuntimeResult<()> {
        let mut map = self.load_all();
        if map.remove(attempt_id).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }

    pub fn count(&self, attempt_id: &str, section_name: &str) -> usize {
        self.load(attempt_id, section_name).len()
    }
}
