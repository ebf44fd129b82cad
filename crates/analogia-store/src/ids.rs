//! Process-durable entity identifiers.
//!
//! Identifiers are handed out by an explicit [`IdAllocator`] that is shared by
//! every component minting ids. The allocator persists its high-water mark
//! through an [`IdStore`] *before* returning an id, so a restart that reloads
//! the store never reuses an identifier.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Entity identifier (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Id(u32);

impl Id {
    /// Reserved sentinel for "no specific entity" (column-aggregated pseudo-entities).
    pub const ANY: Id = Id(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_any(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{}|", self.0)
    }
}

/// Durable storage for the largest identifier issued so far.
pub trait IdStore: Send + Sync {
    fn largest(&self) -> io::Result<Option<u32>>;
    fn persist(&self, largest: u32) -> io::Result<()>;
}

/// Volatile store, for tests and throwaway indexes.
#[derive(Debug, Default)]
pub struct MemoryIdStore {
    largest: Mutex<Option<u32>>,
}

impl MemoryIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_after(largest: u32) -> Self {
        Self {
            largest: Mutex::new(Some(largest)),
        }
    }
}

impl IdStore for MemoryIdStore {
    fn largest(&self) -> io::Result<Option<u32>> {
        Ok(*self.largest.lock())
    }

    fn persist(&self, largest: u32) -> io::Result<()> {
        *self.largest.lock() = Some(largest);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdStoreFile {
    largest_id: u32,
}

/// JSON file holding `{"largest_id": N}`, rewritten atomically via tmp + rename.
#[derive(Debug, Clone)]
pub struct FileIdStore {
    path: PathBuf,
}

impl FileIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdStore for FileIdStore {
    fn largest(&self) -> io::Result<Option<u32>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let file: IdStoreFile = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(file.largest_id))
    }

    fn persist(&self, largest: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let body = serde_json::to_vec(&IdStoreFile { largest_id: largest })
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Monotonic identifier allocator.
pub struct IdAllocator {
    next: Mutex<u32>,
    store: Box<dyn IdStore>,
}

impl IdAllocator {
    /// Resume after the persisted high-water mark, or start at 0.
    pub fn new(store: impl IdStore + 'static) -> io::Result<Self> {
        let next = match store.largest()? {
            Some(largest) => largest.saturating_add(1),
            None => 0,
        };
        Ok(Self {
            next: Mutex::new(next),
            store: Box::new(store),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            next: Mutex::new(0),
            store: Box::new(MemoryIdStore::new()),
        }
    }

    /// Allocate a fresh identifier.
    ///
    /// The new high-water mark is persisted before the id is returned. A
    /// persistence failure (or exhausting the id space) aborts the process:
    /// continuing would risk handing out the same id in a later run.
    pub fn alloc(&self) -> Id {
        let mut next = self.next.lock();
        let id = *next;
        if id == Id::ANY.raw() {
            tracing::error!("identifier space exhausted");
            std::process::abort();
        }
        if let Err(err) = self.store.persist(id) {
            tracing::error!(error = %err, id, "failed to persist identifier high-water mark");
            std::process::abort();
        }
        *next = id + 1;
        Id(id)
    }

    /// Make sure future allocations never collide with `id` (e.g. ids read back from a snapshot).
    pub fn observe(&self, id: Id) {
        if id.is_any() {
            return;
        }
        let mut next = self.next.lock();
        if id.raw() >= *next {
            *next = id.raw() + 1;
        }
    }

    /// The id the next call to [`alloc`](Self::alloc) will return.
    pub fn peek(&self) -> Id {
        Id(*self.next.lock())
    }
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("next", &*self.next.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_alloc_is_monotonic() {
        let ids = IdAllocator::in_memory();
        let a = ids.alloc();
        let b = ids.alloc();
        let c = ids.alloc();
        assert!(a < b && b < c);
        assert_eq!(a, Id::new(0));
    }

    #[test]
    fn test_resume_from_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let first = IdAllocator::new(FileIdStore::new(&path)).unwrap();
        let issued: Vec<Id> = (0..5).map(|_| first.alloc()).collect();
        drop(first);

        let second = IdAllocator::new(FileIdStore::new(&path)).unwrap();
        let next = second.alloc();
        assert!(issued.iter().all(|id| *id < next));
        assert_eq!(next, Id::new(5));
    }

    #[test]
    fn test_observe_skips_loaded_ids() {
        let ids = IdAllocator::in_memory();
        ids.observe(Id::new(41));
        assert_eq!(ids.alloc(), Id::new(42));
        ids.observe(Id::new(3));
        ids.observe(Id::ANY);
        assert_eq!(ids.alloc(), Id::new(43));
    }

    #[test]
    fn test_sentinel_display() {
        assert!(Id::ANY.is_any());
        assert_eq!(Id::new(7).to_string(), "|7|");
    }
}
