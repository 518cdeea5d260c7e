//! Ordered, persisted server list.
//!
//! Index 0 is always the next server to try. Every mutation re-reads the
//! persisted list, applies the change and writes it back, so concurrent
//! readers see the same view.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::entry::{encode_entries, parse_entries, ServerEntry};
use crate::{Error, Result};

/// Backing store for the encoded list (one hex entry per line).
pub trait ListStorage: Send + Sync {
    fn load(&self) -> io::Result<Option<String>>;
    fn store(&self, encoded: &str) -> io::Result<()>;
}

/// File-backed storage. Writes go to a sibling temp file and are renamed
/// into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ListStorage for FileStorage {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store(&self, encoded: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(encoded: impl Into<String>) -> Self {
        Self { inner: Mutex::new(Some(encoded.into())) }
    }

    pub fn contents(&self) -> Option<String> {
        self.inner.lock().clone()
    }
}

impl ListStorage for MemoryStorage {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.inner.lock().clone())
    }

    fn store(&self, encoded: &str) -> io::Result<()> {
        *self.inner.lock() = Some(encoded.to_string());
        Ok(())
    }
}

pub struct ServerStore {
    storage: Box<dyn ListStorage>,
    embedded: String,
    ignore_system: bool,
    shuffle_embedded: bool,
    lock: Mutex<()>,
}

impl ServerStore {
    /// `embedded` is the fixed fallback list shipped with the client
    /// (newline-delimited hex entries).
    pub fn new(storage: Box<dyn ListStorage>, embedded: impl Into<String>) -> Self {
        Self {
            storage,
            embedded: embedded.into(),
            ignore_system: false,
            shuffle_embedded: true,
            lock: Mutex::new(()),
        }
    }

    /// Skip previously persisted entries (testing builds).
    pub fn ignore_system_list(mut self, ignore: bool) -> Self {
        self.ignore_system = ignore;
        self
    }

    pub fn shuffle_embedded(mut self, shuffle: bool) -> Self {
        self.shuffle_embedded = shuffle;
        self
    }

    /// Persisted entries merged with the embedded list, re-persisted.
    ///
    /// A corrupt persisted list is discarded; a corrupt embedded list is fatal.
    pub fn get_list(&self) -> Result<Vec<ServerEntry>> {
        let _g = self.lock.lock();
        self.load_merged()
    }

    /// Merge discovered entries (hex-encoded). Known addresses are
    /// overwritten in place, new ones go to index 1. When `priority` names a
    /// listed server it ends up at index 0. An entry whose certificate is
    /// disabled retires that address from the list. Never fails.
    pub fn add_entries_to_list(&self, encoded: &[String], priority: Option<&ServerEntry>) {
        let mut entries = Vec::with_capacity(encoded.len());
        for line in encoded {
            match ServerEntry::decode(line) {
                Ok(e) => entries.push(e),
                Err(err) => warn!(%err, "skipping corrupt discovered server entry"),
            }
        }
        self.add_server_entries(entries, priority);
    }

    pub fn add_server_entries(&self, new_entries: Vec<ServerEntry>, priority: Option<&ServerEntry>) {
        if new_entries.is_empty() && priority.is_none() {
            return;
        }
        let _g = self.lock.lock();
        let mut list = match self.load_merged() {
            Ok(l) => l,
            Err(err) => {
                warn!(%err, "cannot merge discovered servers");
                return;
            }
        };
        let mut added = 0usize;
        for new in new_entries {
            if new.validate().is_err() {
                warn!(address = %new.address, "skipping invalid discovered entry");
                continue;
            }
            if let Some(known) = list.iter_mut().find(|e| e.address == new.address) {
                // discovery is trusted over stale data
                known.copy_from(&new);
            } else {
                let at = list.len().min(1);
                list.insert(at, new);
                added += 1;
            }
        }
        if let Some(p) = priority {
            if let Some(pos) = list.iter().position(|e| e.address == p.address) {
                if pos != 0 {
                    let e = list.remove(pos);
                    list.insert(0, e);
                }
            }
        }
        // a disabled certificate retires the server
        let before = list.len();
        list.retain(|e| !e.is_disabled());
        if list.len() < before {
            debug!(retired = before - list.len(), "dropped disabled servers");
        }
        if added > 0 {
            info!(added, total = list.len(), "merged discovered servers");
        }
        self.write_list(&list);
    }

    /// Rotate the front entry to the back. No-op with fewer than two entries.
    pub fn mark_current_server_failed(&self) {
        let _g = self.lock.lock();
        let mut list = match self.load_merged() {
            Ok(l) => l,
            Err(err) => {
                warn!(%err, "cannot mark server failed");
                return;
            }
        };
        if list.len() > 1 {
            list.rotate_left(1);
            self.write_list(&list);
        }
    }

    /// Front of the list. An empty list means the install is corrupt.
    pub fn get_next_server(&self) -> Result<ServerEntry> {
        let _g = self.lock.lock();
        self.load_merged()?.into_iter().next().ok_or(Error::Empty)
    }

    pub fn known_addresses(&self) -> Result<Vec<String>> {
        Ok(self.get_list()?.into_iter().map(|e| e.address).collect())
    }

    fn load_system(&self) -> Vec<ServerEntry> {
        if self.ignore_system {
            return Vec::new();
        }
        let text = match self.storage.load() {
            Ok(Some(t)) => t,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(%err, "cannot read system server list");
                return Vec::new();
            }
        };
        match parse_entries(&text) {
            Ok(list) => list,
            Err(err) => {
                warn!(%err, "not using corrupt system server list");
                Vec::new()
            }
        }
    }

    fn load_merged(&self) -> Result<Vec<ServerEntry>> {
        let mut list = self.load_system();
        let mut embedded =
            parse_entries(&self.embedded).map_err(|e| Error::CorruptEmbedded(e.to_string()))?;
        if self.shuffle_embedded {
            embedded.shuffle(&mut rand::thread_rng());
        }
        for e in embedded {
            // persisted data wins for known addresses
            if list.iter().any(|known| known.address == e.address) {
                continue;
            }
            let at = list.len().min(1);
            list.insert(at, e);
        }
        self.write_list(&list);
        Ok(list)
    }

    fn write_list(&self, list: &[ServerEntry]) {
        let encoded = match encode_entries(list) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "cannot encode server list");
                return;
            }
        };
        if let Err(err) = self.storage.store(&encoded) {
            warn!(%err, "cannot persist server list");
        }
    }
}
