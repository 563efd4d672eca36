//! Key-addressed local storage for operator state.
//!
//! Values are opaque strings (the caller serialises them). [`FileStore`] keeps every key in
//! one JSON object on disk and rewrites it atomically on each change.

use crate::error::MonitorError;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Storage key of the serialised [`ParameterSet`](crate::params::ParameterSet).
pub const PARAMS_KEY: &str = "oracle_params";

/// Storage key of the dark-mode preference.
pub const DARK_MODE_KEY: &str = "dark_mode";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String) -> Result<(), MonitorError>;
}

/// In-memory store, used by tests and when no file path is available.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn with_entry(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), MonitorError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON-file backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store; an unreadable or corrupt
    /// file is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(entries)) => entries,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "discarding corrupt local state file");
                    Map::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no local state file yet");
                Map::new()
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read local state file");
                Map::new()
            }
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key)? {
            Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), MonitorError> {
        self.entries.insert(key.to_string(), Value::String(value));
        self.flush()
    }
}

/// Read the dark-mode flag; anything other than a stored `true` is light mode.
pub fn load_dark_mode(store: &dyn KeyValueStore) -> bool {
    store
        .get(DARK_MODE_KEY)
        .is_some_and(|value| value.trim() == "true")
}

pub fn save_dark_mode(store: &mut dyn KeyValueStore, dark_mode: bool) -> Result<(), MonitorError> {
    store.set(DARK_MODE_KEY, dark_mode.to_string())
}
