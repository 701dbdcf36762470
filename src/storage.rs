//! Persisted inventory.
//!
//! `InventoryStore` keeps inventory records in one serialized document behind an
//! `InventoryDocument` backend. Every mutating call runs its whole
//! read-modify-write cycle under a single exclusive guard: `save` needs `&mut`
//! access to the backend, which only the write guard hands out, so a mutation
//! cannot read under one lock and write under another.
//!
//! Durability: each write rewrites the whole document in place. A crash in the
//! middle of a write can leave a truncated document, which the next load treats
//! as an empty store (with a warning).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const DEFAULT_INVENTORY_PATH: &str = "data/inventory_db.json";
pub const DEFAULT_CATEGORY: &str = "grocery";

/// Grasp pose attached to a logged item.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: u64,
    #[serde(alias = "item_name")]
    pub name: String,
    pub category: String,
    pub qty: u32,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<Pose>,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ----------------------------------------------------------------------------
// Document backends
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Cross-process lock held for the duration of one store operation. Dropping
/// it releases the lock.
#[derive(Debug, Default)]
pub struct DocumentLock {
    _file: Option<File>,
}

/// Backing storage for the inventory document.
///
/// `load` reports malformed or unreadable documents as errors; the store decides
/// how to degrade. `save` replaces the entire document.
pub trait InventoryDocument: Send + Sync {
    /// Where the document lives, for logs.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Vec<InventoryItem>>;

    fn save(&mut self, items: &[InventoryItem]) -> Result<()>;

    /// Acquire a lock shared with other processes. Backends that are never
    /// shared across processes return an empty guard.
    fn lock(&self, _mode: LockMode) -> Result<DocumentLock> {
        Ok(DocumentLock::default())
    }
}

/// JSON array on the local filesystem.
#[derive(Debug)]
pub struct JsonFileDocument {
    path: PathBuf,
    lock_path: Option<PathBuf>,
}

impl JsonFileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: None,
        }
    }

    /// Also take an advisory `flock` on `<path>.lock` around every operation, for
    /// deployments where several processes share the document.
    pub fn with_cross_process_lock(mut self) -> Self {
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".lock");
        self.lock_path = Some(PathBuf::from(lock_path));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

impl InventoryDocument for JsonFileDocument {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Vec<InventoryItem>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow!("failed to read {}: {}", self.path.display(), err));
            }
        };
        let items = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid inventory document {}: {}", self.path.display(), e))?;
        Ok(items)
    }

    fn save(&mut self, items: &[InventoryItem]) -> Result<()> {
        Self::ensure_parent(&self.path)?;
        let json = serde_json::to_vec_pretty(items)?;
        fs::write(&self.path, json)
            .with_context(|| format!("write inventory document {}", self.path.display()))?;
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> Result<DocumentLock> {
        let Some(lock_path) = &self.lock_path else {
            return Ok(DocumentLock::default());
        };
        Self::ensure_parent(lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        flock(&file, mode)?;
        Ok(DocumentLock { _file: Some(file) })
    }
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    // SAFETY: the descriptor belongs to `file`, which outlives this call. The
    // lock is released when the descriptor is closed.
    let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("flock inventory lock file");
    }
    Ok(())
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> Result<()> {
    log::debug!("InventoryStore: cross-process locking unsupported on this platform");
    Ok(())
}

/// Document kept in memory. Used by tests and by tools that need a scratch store.
#[derive(Debug, Default)]
pub struct InMemoryDocument {
    items: Vec<InventoryItem>,
    raw_override: Option<String>,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a serialized document, which may be malformed.
    pub fn from_json(raw: &str) -> Self {
        Self {
            items: Vec::new(),
            raw_override: Some(raw.to_string()),
        }
    }
}

impl InventoryDocument for InMemoryDocument {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load(&self) -> Result<Vec<InventoryItem>> {
        match &self.raw_override {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(self.items.clone()),
        }
    }

    fn save(&mut self, items: &[InventoryItem]) -> Result<()> {
        self.raw_override = None;
        self.items = items.to_vec();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// InventoryStore
// ----------------------------------------------------------------------------

/// Locked, persisted inventory.
///
/// Constructed once at startup and shared (`Arc`) with every component that
/// needs it.
pub struct InventoryStore {
    doc: RwLock<Box<dyn InventoryDocument>>,
}

impl InventoryStore {
    pub fn with_document(doc: Box<dyn InventoryDocument>) -> Self {
        log::info!("InventoryStore: using {}", doc.describe());
        Self {
            doc: RwLock::new(doc),
        }
    }

    /// JSON document at `path`, optionally with cross-process file locking.
    pub fn open(path: impl Into<PathBuf>, cross_process_lock: bool) -> Self {
        let mut doc = JsonFileDocument::new(path);
        if cross_process_lock {
            doc = doc.with_cross_process_lock();
        }
        Self::with_document(Box::new(doc))
    }

    pub fn in_memory() -> Self {
        Self::with_document(Box::new(InMemoryDocument::new()))
    }

    fn read_doc(&self) -> Result<RwLockReadGuard<'_, Box<dyn InventoryDocument>>> {
        self.doc
            .read()
            .map_err(|_| anyhow!("inventory lock poisoned"))
    }

    fn write_doc(&self) -> Result<RwLockWriteGuard<'_, Box<dyn InventoryDocument>>> {
        self.doc
            .write()
            .map_err(|_| anyhow!("inventory lock poisoned"))
    }

    fn load_or_empty(doc: &dyn InventoryDocument) -> Vec<InventoryItem> {
        match doc.load() {
            Ok(items) => items,
            Err(err) => {
                log::warn!("InventoryStore: treating document as empty: {:#}", err);
                Vec::new()
            }
        }
    }

    /// Run `f` over the current records under the exclusive guard and persist
    /// the result when `f` reports a change.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<InventoryItem>) -> Result<(T, bool)>) -> Result<T> {
        let mut doc = self.write_doc()?;
        let _lock = doc.lock(LockMode::Exclusive)?;
        let mut items = Self::load_or_empty(&**doc);
        let (out, changed) = f(&mut items)?;
        if changed {
            doc.save(&items)?;
        }
        Ok(out)
    }

    /// Increment the record matching `name` case-insensitively, or append a new one.
    pub fn add_or_increment(
        &self,
        name: &str,
        category: &str,
        qty: u32,
        pose: Option<Pose>,
    ) -> Result<InventoryItem> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("item name must not be empty"));
        }
        if qty == 0 {
            return Err(anyhow!("qty must be at least 1"));
        }
        let key = normalize_name(name);

        self.mutate(|items| {
            if let Some(item) = items.iter_mut().find(|item| normalize_name(&item.name) == key) {
                item.qty = item
                    .qty
                    .checked_add(qty)
                    .ok_or_else(|| anyhow!("qty overflow for {}", item.name))?;
                item.timestamp = now_timestamp();
                if pose.is_some() {
                    item.pose = pose;
                }
                log::info!("InventoryStore: {} qty -> {}", item.name, item.qty);
                return Ok((item.clone(), true));
            }

            let id = items.iter().map(|item| item.id).max().unwrap_or(0) + 1;
            let item = InventoryItem {
                id,
                name: name.to_string(),
                category: category.to_string(),
                qty,
                timestamp: now_timestamp(),
                pose,
            };
            log::info!("InventoryStore: added {} ({}) id={}", item.name, item.category, id);
            items.push(item.clone());
            Ok((item, true))
        })
    }

    /// Snapshot of all records in persisted order.
    pub fn get_all(&self) -> Result<Vec<InventoryItem>> {
        let doc = self.read_doc()?;
        let _lock = doc.lock(LockMode::Shared)?;
        Ok(Self::load_or_empty(&**doc))
    }

    pub fn get_by_id(&self, id: u64) -> Result<Option<InventoryItem>> {
        Ok(self.get_all()?.into_iter().find(|item| item.id == id))
    }

    /// Set the quantity of the record matching `name`. Returns `None` if absent.
    pub fn update_qty(&self, name: &str, qty: u32) -> Result<Option<InventoryItem>> {
        if qty == 0 {
            return Err(anyhow!("qty must be at least 1"));
        }
        let key = normalize_name(name);
        self.mutate(|items| {
            match items.iter_mut().find(|item| normalize_name(&item.name) == key) {
                Some(item) => {
                    item.qty = qty;
                    item.timestamp = now_timestamp();
                    Ok((Some(item.clone()), true))
                }
                None => Ok((None, false)),
            }
        })
    }

    /// Remove the record matching `name` case-insensitively.
    pub fn delete_by_name(&self, name: &str) -> Result<bool> {
        let key = normalize_name(name);
        self.mutate(|items| {
            let before = items.len();
            items.retain(|item| normalize_name(&item.name) != key);
            let removed = items.len() < before;
            Ok((removed, removed))
        })
    }

    pub fn delete_by_id(&self, id: u64) -> Result<bool> {
        self.mutate(|items| {
            let before = items.len();
            items.retain(|item| item.id != id);
            let removed = items.len() < before;
            Ok((removed, removed))
        })
    }

    /// Overwrite the document with an empty one.
    pub fn clear(&self) -> Result<()> {
        let mut doc = self.write_doc()?;
        let _lock = doc.lock(LockMode::Exclusive)?;
        doc.save(&[])?;
        log::info!("InventoryStore: cleared {}", doc.describe());
        Ok(())
    }
}
