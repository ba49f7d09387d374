use std::{
    collections::HashMap,
    fmt::Debug,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use arborist_hasher::Hash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    errors::ProofCacheError,
    types::{BatchProof, QueueKind},
    utils::root_prefix,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofCacheKey {
    pub queue: QueueKind,
    #[serde(with = "hex::serde")]
    pub old_root: Hash,
    #[serde(with = "hex::serde")]
    pub new_root: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofCacheEntry {
    pub key: ProofCacheKey,
    pub proof: BatchProof,
}

/// Persistent backing of the proof cache. Entries are never rewritten: an
/// append for a key the store already holds leaves the store unchanged.
pub trait ProofStore: Send + Sync + Debug {
    fn load_all(&self) -> Result<Vec<ProofCacheEntry>, ProofCacheError>;

    /// Returns `false` when the key was already present.
    fn append(&self, entry: &ProofCacheEntry) -> Result<bool, ProofCacheError>;
}

/// One JSON entry per line.
#[derive(Debug, Clone)]
pub struct FileProofStore {
    path: PathBuf,
}

impl FileProofStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, error: std::io::Error) -> ProofCacheError {
        ProofCacheError::Io {
            path: self.path.clone(),
            error: error.to_string(),
        }
    }
}

impl ProofStore for FileProofStore {
    fn load_all(&self) -> Result<Vec<ProofCacheEntry>, ProofCacheError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| ProofCacheError::Malformed {
                    line: i + 1,
                    error: e.to_string(),
                })
            })
            .collect()
    }

    fn append(&self, entry: &ProofCacheEntry) -> Result<bool, ProofCacheError> {
        // Another process may have written the key since this one loaded.
        if self.load_all()?.iter().any(|stored| stored.key == entry.key) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let line =
            serde_json::to_string(entry).map_err(|e| ProofCacheError::Serialize(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        writeln!(file, "{}", line).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        Ok(true)
    }
}

/// In-process store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryProofStore {
    entries: Arc<Mutex<Vec<ProofCacheEntry>>>,
}

impl MemoryProofStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProofStore for MemoryProofStore {
    fn load_all(&self) -> Result<Vec<ProofCacheEntry>, ProofCacheError> {
        Ok(self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn append(&self, entry: &ProofCacheEntry) -> Result<bool, ProofCacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|stored| stored.key == entry.key) {
            return Ok(false);
        }
        entries.push(entry.clone());
        Ok(true)
    }
}

/// Write-once map from `(queue, old_root, new_root)` to a verified proof.
#[derive(Debug)]
pub struct ProofCache {
    store: Box<dyn ProofStore>,
    entries: HashMap<ProofCacheKey, BatchProof>,
}

impl ProofCache {
    pub fn open(store: Box<dyn ProofStore>) -> Result<Self, ProofCacheError> {
        let mut entries = HashMap::new();
        for entry in store.load_all()? {
            entries.entry(entry.key).or_insert(entry.proof);
        }
        info!("Opened proof cache with {} entries", entries.len());
        Ok(Self { store, entries })
    }

    pub fn get(&self, key: &ProofCacheKey) -> Option<&BatchProof> {
        self.entries.get(key)
    }

    /// Stores `entry` unless its key is already present. Returns whether
    /// anything was written.
    pub fn put(&mut self, entry: ProofCacheEntry) -> Result<bool, ProofCacheError> {
        if let Some(existing) = self.entries.get(&entry.key) {
            if *existing != entry.proof {
                warn!(
                    "Ignoring differing proof for cached {} batch {} -> {}",
                    entry.key.queue,
                    root_prefix(&entry.key.old_root),
                    root_prefix(&entry.key.new_root)
                );
            }
            return Ok(false);
        }

        if self.store.append(&entry)? {
            debug!(
                "Cached {} proof {} -> {}",
                entry.key.queue,
                root_prefix(&entry.key.old_root),
                root_prefix(&entry.key.new_root)
            );
            self.entries.insert(entry.key, entry.proof);
            return Ok(true);
        }

        warn!(
            "{} proof {} -> {} was cached concurrently, keeping stored entry",
            entry.key.queue,
            root_prefix(&entry.key.old_root),
            root_prefix(&entry.key.new_root)
        );
        if let Some(stored) = self
            .store
            .load_all()?
            .into_iter()
            .find(|stored| stored.key == entry.key)
        {
            self.entries.insert(stored.key, stored.proof);
        }
        Ok(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
