//! User preferences and the small key/value store the manager persists
//! into (the last-connected timestamp).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LAST_CONNECTED_KEY: &str = "last_connected";

pub trait SettingsStore: Send + Sync {
    fn skip_browser(&self) -> bool;
    fn skip_autoconnect(&self) -> bool;
    fn split_tunnel(&self) -> bool;
    fn read_value(&self, key: &str) -> Option<String>;
    fn write_value(&self, key: &str, value: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub skip_browser: bool,
    pub skip_autoconnect: bool,
    pub split_tunnel: bool,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<UserSettings>,
}

impl MemorySettings {
    pub fn new(settings: UserSettings) -> Self {
        Self { inner: Mutex::new(settings) }
    }

    pub fn snapshot(&self) -> UserSettings {
        self.inner.lock().clone()
    }
}

impl SettingsStore for MemorySettings {
    fn skip_browser(&self) -> bool {
        self.inner.lock().skip_browser
    }
    fn skip_autoconnect(&self) -> bool {
        self.inner.lock().skip_autoconnect
    }
    fn split_tunnel(&self) -> bool {
        self.inner.lock().split_tunnel
    }
    fn read_value(&self, key: &str) -> Option<String> {
        self.inner.lock().values.get(key).cloned()
    }
    fn write_value(&self, key: &str, value: &str) -> io::Result<()> {
        self.inner.lock().values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file backed settings. A missing or unreadable file yields
/// defaults.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    inner: Mutex<UserSettings>,
}

impl FileSettings {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "settings file unreadable; using defaults");
                UserSettings::default()
            }),
            Err(_) => UserSettings::default(),
        };
        Self { path, inner: Mutex::new(settings) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, settings: &UserSettings) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(settings).map_err(io::Error::other)?;
        fs::write(&self.path, bytes)
    }
}

impl SettingsStore for FileSettings {
    fn skip_browser(&self) -> bool {
        self.inner.lock().skip_browser
    }
    fn skip_autoconnect(&self) -> bool {
        self.inner.lock().skip_autoconnect
    }
    fn split_tunnel(&self) -> bool {
        self.inner.lock().split_tunnel
    }
    fn read_value(&self, key: &str) -> Option<String> {
        self.inner.lock().values.get(key).cloned()
    }
    fn write_value(&self, key: &str, value: &str) -> io::Result<()> {
        let mut g = self.inner.lock();
        g.values.insert(key.to_string(), value.to_string());
        self.save(&g)
    }
}
