use anyhow::{Context, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::constants::{config, keys};
use crate::error::TourError;

/// Key-value storage port
///
/// Synchronous get/set semantics; a missing key means "default".
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), TourError>;
    fn remove(&self, key: &str) -> Result<(), TourError>;
}

/// In-memory store (tests, hosts without storage)
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), TourError> {
        self.values.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TourError> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

/// JSON file store, rewritten on every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RefCell<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// `<data dir>/spotlight-tour/preferences.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::PREFERENCES_FILENAME);
        path
    }

    /// Open (or start empty when the file does not exist yet)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences from {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse preferences from {:?}", path))?
        } else {
            debug!(path = %path.display(), "No preferences file yet, starting empty");
            BTreeMap::new()
        };
        info!(path = %path.display(), keys = values.len(), "Opened preference store");
        Ok(Self {
            path,
            values: RefCell::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), TourError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.values.borrow())?;
        fs::write(&self.path, json).map_err(|e| {
            TourError::Storage(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), TourError> {
        self.values.borrow_mut().insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<(), TourError> {
        let removed = self.values.borrow_mut().remove(key).is_some();
        if removed {
            self.flush()?;
        }
        Ok(())
    }
}

/// Typed view over the tour flags kept in a `PreferenceStore`
#[derive(Clone)]
pub struct TourPreferences {
    store: Rc<dyn PreferenceStore>,
}

impl std::fmt::Debug for TourPreferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourPreferences")
            .field("seen_intro", &self.has_seen_intro())
            .field("completed_tours", &self.completed_tours())
            .field("skip_animations", &self.skip_animations())
            .finish()
    }
}

impl TourPreferences {
    pub fn new(store: Rc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Rc::new(MemoryStore::new()))
    }

    pub fn has_seen_intro(&self) -> bool {
        self.flag(keys::SEEN_INTRO)
    }

    pub fn set_seen_intro(&self, seen: bool) -> Result<(), TourError> {
        self.store.set(keys::SEEN_INTRO, Value::Bool(seen))
    }

    pub fn skip_animations(&self) -> bool {
        self.flag(keys::SKIP_ANIMATIONS)
    }

    pub fn set_skip_animations(&self, skip: bool) -> Result<(), TourError> {
        self.store.set(keys::SKIP_ANIMATIONS, Value::Bool(skip))
    }

    pub fn completed_tours(&self) -> Vec<String> {
        match self.store.get(keys::COMPLETED_TOURS) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed completed tour list");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    pub fn is_completed(&self, tour_id: &str) -> bool {
        self.completed_tours().iter().any(|id| id == tour_id)
    }

    /// Append to the completed list (no duplicates)
    pub fn mark_completed(&self, tour_id: &str) -> Result<(), TourError> {
        let mut completed = self.completed_tours();
        if completed.iter().any(|id| id == tour_id) {
            return Ok(());
        }
        completed.push(tour_id.to_string());
        self.store.set(keys::COMPLETED_TOURS, serde_json::to_value(completed)?)
    }

    pub fn preferences(&self) -> BTreeMap<String, Value> {
        self.store
            .get(keys::PREFERENCES)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn preference(&self, key: &str) -> Option<Value> {
        self.preferences().remove(key)
    }

    pub fn set_preference(&self, key: &str, value: Value) -> Result<(), TourError> {
        let mut preferences = self.preferences();
        preferences.insert(key.to_string(), value);
        self.store.set(keys::PREFERENCES, serde_json::to_value(preferences)?)
    }

    /// Forget every tour flag
    pub fn reset(&self) -> Result<(), TourError> {
        for key in [
            keys::SEEN_INTRO,
            keys::COMPLETED_TOURS,
            keys::SKIP_ANIMATIONS,
            keys::PREFERENCES,
        ] {
            self.store.remove(key)?;
        }
        Ok(())
    }

    fn flag(&self, key: &str) -> bool {
        self.store
            .get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }
}
