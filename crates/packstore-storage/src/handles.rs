//! Read-handle registry
//!
//! Caches one open [`BlockFile`] per block path so repeated reads skip the
//! `open(2)`. Handles are shared as `Arc`s: evicting an entry never closes a
//! file out from under an in-flight read.
//!
//! Every eviction bumps a generation. A handle opened under an older
//! generation is handed to its caller but never cached, so a file unlinked
//! by `evict_prefix`'s caller cannot re-enter the registry.

use crate::block_file::BlockFile;
use packstore_common::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Read-handle registry statistics
#[derive(Debug, Default)]
pub struct HandleStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub opens: AtomicU64,
    pub evictions: AtomicU64,
}

struct HandleEntry {
    file: Arc<BlockFile>,
    last_access: u64,
}

struct Handles {
    map: HashMap<PathBuf, HandleEntry>,
    clock: u64,
    generation: u64,
}

impl Handles {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded LRU map from relative block path to an open read handle
pub struct ReadHandleRegistry {
    root: PathBuf,
    handles: Mutex<Handles>,
    capacity: usize,
    stats: HandleStats,
}

impl ReadHandleRegistry {
    /// Registry for block files under `root`, holding at most `capacity`
    /// open handles
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            root: root.into(),
            handles: Mutex::new(Handles {
                map: HashMap::new(),
                clock: 0,
                generation: 0,
            }),
            capacity: capacity.max(1),
            stats: HandleStats::default(),
        }
    }

    pub fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.handles.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for a block path relative to the root, opening it on first use
    ///
    /// The file is opened outside the lock. When two callers race on the
    /// same path the first insert wins and the loser's handle is dropped.
    pub fn get_or_open(&self, relative: &Path) -> Result<Arc<BlockFile>> {
        let generation = match self.cached(relative) {
            Ok(file) => return Ok(file),
            Err(generation) => generation,
        };
        let opened = Arc::new(BlockFile::open_readable(self.root.join(relative))?);
        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        Ok(self.admit(relative, opened, generation))
    }

    /// Cached handle, or the generation a miss was observed under
    fn cached(&self, relative: &Path) -> std::result::Result<Arc<BlockFile>, u64> {
        let mut handles = self.handles.lock();
        let clock = handles.tick();
        if let Some(entry) = handles.map.get_mut(relative) {
            entry.last_access = clock;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.file));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Err(handles.generation)
    }

    /// Cache a freshly opened handle unless an eviction happened since the
    /// miss at `generation`
    fn admit(&self, relative: &Path, opened: Arc<BlockFile>, generation: u64) -> Arc<BlockFile> {
        let mut handles = self.handles.lock();
        if handles.generation != generation {
            debug!("not caching {} opened before an eviction", relative.display());
            return opened;
        }
        let clock = handles.tick();
        if let Some(entry) = handles.map.get_mut(relative) {
            entry.last_access = clock;
            debug!("dropping redundant handle for {}", relative.display());
            return Arc::clone(&entry.file);
        }

        while handles.map.len() >= self.capacity {
            let lru = handles
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(path, _)| path.clone());
            match lru {
                Some(path) => {
                    handles.map.remove(&path);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        handles.map.insert(
            relative.to_path_buf(),
            HandleEntry {
                file: Arc::clone(&opened),
                last_access: clock,
            },
        );
        opened
    }

    /// Drop every handle whose path lies under `prefix`, returning the count
    pub fn evict_prefix(&self, prefix: &Path) -> usize {
        let mut handles = self.handles.lock();
        handles.generation += 1;
        let before = handles.map.len();
        handles.map.retain(|path, _| !path.starts_with(prefix));
        before - handles.map.len()
    }

    /// Drop every handle, returning how many were open
    pub fn close_all(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.generation += 1;
        let count = handles.map.len();
        handles.map.clear();
        count
    }
}
