//! Local key-value cache (the device preference store).
//!
//! `LocalCache` is a flat key → value map. `LessonPrefs` scopes it to one
//! account and one lesson using the keys from the lesson descriptor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::{CompletionSet, LessonSchema};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache file error: {0}")]
  Io(#[from] std::io::Error),
  #[error("cache encoding error: {0}")]
  Encoding(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CacheValue {
  Flag(bool),
  Count(u32),
  Set(CompletionSet),
}

pub trait LocalCache: Send + Sync + 'static {
  fn get(&self, key: &str) -> Option<CacheValue>;
  fn put(&self, key: &str, value: CacheValue) -> Result<(), CacheError>;
  fn remove(&self, key: &str) -> Result<(), CacheError>;
}

fn lock(map: &Mutex<BTreeMap<String, CacheValue>>) -> MutexGuard<'_, BTreeMap<String, CacheValue>> {
  map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryCache {
  values: Mutex<BTreeMap<String, CacheValue>>,
}

impl MemoryCache {
  pub fn new() -> Self { Self::default() }
}

impl LocalCache for MemoryCache {
  fn get(&self, key: &str) -> Option<CacheValue> { lock(&self.values).get(key).cloned() }

  fn put(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
    lock(&self.values).insert(key.to_string(), value);
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    lock(&self.values).remove(key);
    Ok(())
  }
}

/// JSON file cache; the whole map is rewritten on every change.
pub struct FileCache {
  path: PathBuf,
  values: Mutex<BTreeMap<String, CacheValue>>,
}

impl FileCache {
  /// Open (or start) a cache at `path`. A missing file is an empty cache.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
    let path = path.as_ref().to_path_buf();
    let values = match std::fs::read_to_string(&path) {
      Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
      Ok(raw) => serde_json::from_str(&raw)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
      Err(e) => return Err(e.into()),
    };
    Ok(Self { path, values: Mutex::new(values) })
  }

  fn persist(&self, values: &BTreeMap<String, CacheValue>) -> Result<(), CacheError> {
    if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
      std::fs::create_dir_all(dir)?;
    }
    let tmp = self.path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
    std::fs::rename(&tmp, &self.path)?;
    Ok(())
  }
}

impl LocalCache for FileCache {
  fn get(&self, key: &str) -> Option<CacheValue> { lock(&self.values).get(key).cloned() }

  fn put(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
    let mut values = lock(&self.values);
    values.insert(key.to_string(), value);
    self.persist(&values)
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    let mut values = lock(&self.values);
    if values.remove(key).is_some() {
      self.persist(&values)?;
    }
    Ok(())
  }
}

/// Typed view of the cache for one account and one lesson.
/// Write failures are logged; the in-memory state of the caller stays authoritative.
#[derive(Clone)]
pub struct LessonPrefs {
  cache: Arc<dyn LocalCache>,
  completed_key: String,
  congrats_key: String,
  item_count_key: String,
}

impl LessonPrefs {
  pub fn new(cache: Arc<dyn LocalCache>, account: &str, schema: &LessonSchema) -> Self {
    Self {
      cache,
      completed_key: format!("{account}/{}", schema.completed_key),
      congrats_key: format!("{account}/{}", schema.congrats_key),
      item_count_key: format!("{account}/{}", schema.item_count_key),
    }
  }

  fn write(&self, key: &str, value: CacheValue) {
    if let Err(e) = self.cache.put(key, value) {
      warn!(target: "lesson", %key, error = %e, "Failed to write local cache");
    }
  }

  fn erase(&self, key: &str) {
    if let Err(e) = self.cache.remove(key) {
      warn!(target: "lesson", %key, error = %e, "Failed to clear local cache entry");
    }
  }

  pub fn completed(&self) -> CompletionSet {
    match self.cache.get(&self.completed_key) {
      Some(CacheValue::Set(set)) => set,
      _ => CompletionSet::new(),
    }
  }

  pub fn set_completed(&self, set: &CompletionSet) { self.write(&self.completed_key, CacheValue::Set(set.clone())); }

  pub fn congratulated(&self) -> bool {
    matches!(self.cache.get(&self.congrats_key), Some(CacheValue::Flag(true)))
  }

  pub fn set_congratulated(&self, shown: bool) { self.write(&self.congrats_key, CacheValue::Flag(shown)); }

  /// Last observed catalog size (the catalog version).
  pub fn last_item_count(&self) -> u32 {
    match self.cache.get(&self.item_count_key) {
      Some(CacheValue::Count(n)) => n,
      _ => 0,
    }
  }

  pub fn set_last_item_count(&self, count: u32) { self.write(&self.item_count_key, CacheValue::Count(count)); }

  /// Forget completions and the congratulation flag; the catalog version stays.
  pub fn clear_progress(&self) {
    self.erase(&self.completed_key);
    self.erase(&self.congrats_key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::seeds::builtin_lessons;

  fn ids(v: &[&str]) -> CompletionSet { v.iter().map(|s| s.to_string()).collect() }

  #[test]
  fn prefs_are_scoped_per_account_and_lesson() {
    let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
    let lessons = builtin_lessons();
    let a = LessonPrefs::new(cache.clone(), "u1", &lessons[0]);
    let b = LessonPrefs::new(cache.clone(), "u2", &lessons[0]);
    let c = LessonPrefs::new(cache, "u1", &lessons[1]);

    a.set_completed(&ids(&["Salamat"]));
    a.set_congratulated(true);
    a.set_last_item_count(5);

    assert_eq!(a.completed(), ids(&["Salamat"]));
    assert!(b.completed().is_empty() && !b.congratulated());
    assert!(c.completed().is_empty() && c.last_item_count() == 0);
  }

  #[test]
  fn clear_progress_keeps_catalog_version() {
    let lessons = builtin_lessons();
    let prefs = LessonPrefs::new(Arc::new(MemoryCache::new()), "u1", &lessons[0]);
    prefs.set_completed(&ids(&["a"]));
    prefs.set_congratulated(true);
    prefs.set_last_item_count(3);
    prefs.clear_progress();
    assert!(prefs.completed().is_empty());
    assert!(!prefs.congratulated());
    assert_eq!(prefs.last_item_count(), 3);
  }

  #[test]
  fn file_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    {
      let cache = FileCache::open(&path).unwrap();
      cache.put("u1/completed_numbers", CacheValue::Set(ids(&["Adwa", "Metung"]))).unwrap();
      cache.put("u1/has_shown_numbers_congratulations", CacheValue::Flag(true)).unwrap();
      cache.put("u1/last_number_item_count", CacheValue::Count(5)).unwrap();
    }
    let cache = FileCache::open(&path).unwrap();
    assert_eq!(cache.get("u1/completed_numbers"), Some(CacheValue::Set(ids(&["Adwa", "Metung"]))));
    assert_eq!(cache.get("u1/has_shown_numbers_congratulations"), Some(CacheValue::Flag(true)));
    assert_eq!(cache.get("u1/last_number_item_count"), Some(CacheValue::Count(5)));
  }

  #[test]
  fn corrupt_file_is_an_encoding_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(FileCache::open(&path), Err(CacheError::Encoding(_))));
  }
}
