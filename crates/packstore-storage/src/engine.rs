//! Storage engine facade
//!
//! Ties the write contexts, the read-handle registry and the lookup cache to
//! a shared [`MetadataStore`]:
//!
//! - `store` appends the payload, then records it with one atomic pipeline
//!   (`HINCRBY <set> r.<hash> 1` + `HSETNX <set> <hash> <descriptor>`); the
//!   second reply decides between a new record and a duplicate.
//! - `fetch` maps `(set, hash)` to a descriptor through the lookup cache and
//!   reads the bytes it points to.
//! - `resolve` reads straight from a descriptor string.

use crate::block_file::BlockFile;
use crate::handles::{HandleStats, ReadHandleRegistry};
use crate::layout::StorageLayout;
use crate::lookup::{LookupCache, TtlLookupCache};
use crate::stats::EngineStats;
use crate::writer::WriteContexts;
use bytes::Bytes;
use packstore_common::{Config, Error, LocationDescriptor, NodeIdentity, Result, SetName, keys};
use packstore_meta_store::{MetaOp, MetaReply, MetadataStore};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Result of a successful store call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The object is recorded under this descriptor
    Stored(LocationDescriptor),
    /// The hash was already recorded; the appended bytes are orphaned
    Duplicate,
}

impl StoreOutcome {
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }

    /// Descriptor of a newly stored object
    #[must_use]
    pub const fn descriptor(&self) -> Option<&LocationDescriptor> {
        match self {
            Self::Stored(location) => Some(location),
            Self::Duplicate => None,
        }
    }
}

/// What [`StorageEngine::shutdown`] released and what failed on the way
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub write_contexts_closed: usize,
    pub read_handles_closed: usize,
    /// Resource name and the error it failed with
    pub failures: Vec<(String, Error)>,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Content-addressed object store over append-only block files
pub struct StorageEngine {
    node: NodeIdentity,
    layout: StorageLayout,
    meta: Arc<dyn MetadataStore>,
    writers: WriteContexts,
    handles: ReadHandleRegistry,
    lookup: Arc<dyn LookupCache>,
    stats: EngineStats,
    shut_down: AtomicBool,
}

impl StorageEngine {
    /// Open an engine with the TTL lookup cache described by `config`
    pub fn open(config: &Config, meta: Arc<dyn MetadataStore>) -> Result<Self> {
        let cache = &config.lookup_cache;
        let lookup = Arc::new(TtlLookupCache::new(
            cache.capacity,
            cache.ttl(),
            cache.cleanup_interval(),
        ));
        Self::with_lookup_cache(config, meta, lookup)
    }

    /// Open an engine with a caller-supplied lookup cache
    pub fn with_lookup_cache(
        config: &Config,
        meta: Arc<dyn MetadataStore>,
        lookup: Arc<dyn LookupCache>,
    ) -> Result<Self> {
        config.validate()?;
        let node = config.node_identity();
        let layout = StorageLayout::create(&config.storage.root)?;
        let writers = WriteContexts::new(
            Arc::clone(&meta),
            layout.clone(),
            node.clone(),
            config.storage.block_size,
        );
        let handles = ReadHandleRegistry::new(layout.root(), config.storage.read_handle_capacity);

        info!(
            "Storage engine open: node={}, root={:?}, block_size={}",
            node,
            layout.root(),
            config.storage.block_size
        );
        Ok(Self {
            node,
            layout,
            meta,
            writers,
            handles,
            lookup,
            stats: EngineStats::default(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Identity embedded in descriptors written by this engine
    #[must_use]
    pub const fn node(&self) -> &NodeIdentity {
        &self.node
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    #[must_use]
    pub const fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Number of cached read handles
    #[must_use]
    pub fn open_read_handles(&self) -> usize {
        self.handles.len()
    }

    /// Hit, miss, open and eviction counters of the read-handle registry
    #[must_use]
    pub fn read_handle_stats(&self) -> &HandleStats {
        self.handles.stats()
    }

    fn check_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    /// Store `payload` under `hash` in `set`
    ///
    /// The payload is appended before the record is written, so a duplicate
    /// still costs its bytes on disk.
    pub fn store(&self, set: &SetName, hash: &str, payload: &[u8]) -> Result<StoreOutcome> {
        self.check_open()?;
        check_hash(hash)?;

        let slot = self.writers.append(set, payload)?;
        self.stats
            .bytes_written
            .fetch_add(slot.length, Ordering::Relaxed);
        if slot.rolled_over {
            EngineStats::incr(&self.stats.rollovers);
        }

        let location = LocationDescriptor::new(
            set.clone(),
            &self.node,
            slot.block,
            slot.offset,
            slot.length,
        );
        let record_key = keys::content_hash(set);
        let replies = self
            .meta
            .execute(vec![
                MetaOp::hincrby(record_key.clone(), keys::reference_field(hash), 1),
                MetaOp::hsetnx(record_key, hash, location.to_string()),
            ])
            .map_err(|e| {
                error!("set {}: failed to record {} at {}: {}", set, hash, location, e);
                Error::from(e)
            })?;

        match replies.as_slice() {
            [MetaReply::Int(_), MetaReply::Int(1)] => {
                EngineStats::incr(&self.stats.stores);
                debug!("set {}: stored {} at {}", set, hash, location);
                Ok(StoreOutcome::Stored(location))
            }
            [MetaReply::Int(refs), MetaReply::Int(0)] => {
                EngineStats::incr(&self.stats.duplicates);
                warn!(
                    "set {}: {} already recorded ({} refs), {} bytes at {} orphaned",
                    set, hash, refs, slot.length, location
                );
                Ok(StoreOutcome::Duplicate)
            }
            other => Err(Error::metadata(format!(
                "unexpected reply to store pipeline: {other:?}"
            ))),
        }
    }

    /// Store many objects in input order, one outcome per object
    ///
    /// Mismatched input lengths fail before anything is written.
    pub fn store_batch<H, P>(
        &self,
        sets: &[SetName],
        hashes: &[H],
        payloads: &[P],
    ) -> Result<Vec<Result<StoreOutcome>>>
    where
        H: AsRef<str>,
        P: AsRef<[u8]>,
    {
        if sets.len() != hashes.len() || hashes.len() != payloads.len() {
            return Err(Error::invalid_argument(format!(
                "batch lengths differ: {} sets, {} hashes, {} payloads",
                sets.len(),
                hashes.len(),
                payloads.len()
            )));
        }
        self.check_open()?;
        Ok(sets
            .iter()
            .zip(hashes)
            .zip(payloads)
            .map(|((set, hash), payload)| self.store(set, hash.as_ref(), payload.as_ref()))
            .collect())
    }

    /// Read the object recorded under `hash` in `set`
    pub fn fetch(&self, set: &SetName, hash: &str) -> Result<Bytes> {
        self.check_open()?;
        check_hash(hash)?;
        EngineStats::incr(&self.stats.fetches);

        let cache_key = keys::lookup(set, hash);
        let descriptor = if let Some(cached) = self.lookup.get(&cache_key) {
            EngineStats::incr(&self.stats.lookup_hits);
            cached
        } else {
            EngineStats::incr(&self.stats.lookup_misses);
            let Some(found) = self.meta.hget(&keys::content_hash(set), hash)? else {
                EngineStats::incr(&self.stats.not_found);
                return Err(Error::NotFound {
                    set: set.to_string(),
                    hash: hash.to_string(),
                });
            };
            self.lookup.put(cache_key, found.clone());
            found
        };
        let location: LocationDescriptor = descriptor.parse()?;
        if location.set != *set {
            return Err(Error::metadata(format!(
                "record {set}/{hash} points into set {}",
                location.set
            )));
        }
        self.resolve_location(&location)
    }

    /// Read the object a descriptor string points to
    pub fn resolve(&self, descriptor: &str) -> Result<Bytes> {
        self.check_open()?;
        let location: LocationDescriptor = descriptor.parse()?;
        self.resolve_location(&location)
    }

    /// Read the object at an already parsed location
    pub fn resolve_location(&self, location: &LocationDescriptor) -> Result<Bytes> {
        self.check_open()?;
        if !location.is_hosted_by(&self.node) {
            return Err(Error::ForeignNode {
                node: location.node.clone(),
                port: location.port,
            });
        }
        let file: Arc<BlockFile> = self.handles.get_or_open(&location.relative_path())?;
        let data = file.read_exact_at(location.offset, location.length)?;
        debug!("read {} bytes from {}", data.len(), location);
        Ok(data)
    }

    /// Remove a set's block files from this node
    ///
    /// Returns whether the set had a directory. Metadata records are left in
    /// place, so later fetches of the set's hashes fail with an I/O error.
    pub fn delete_set(&self, set: &SetName) -> Result<bool> {
        self.check_open()?;
        let prefix = Path::new(set.as_str());
        let existed = self.writers.retire(set, || {
            let removed = self.layout.remove_set(set);
            let evicted = self.handles.evict_prefix(prefix);
            debug!("set {}: dropped {} read handles", set, evicted);
            removed
        })?;
        if existed {
            info!("set {}: deleted from {:?}", set, self.layout.root());
        } else {
            debug!("set {}: nothing to delete", set);
        }
        Ok(existed)
    }

    /// Reference count of `hash` in `set`; zero when never stored
    pub fn reference_count(&self, set: &SetName, hash: &str) -> Result<u64> {
        self.check_open()?;
        check_hash(hash)?;
        let field = keys::reference_field(hash);
        match self.meta.hget(&keys::content_hash(set), &field)? {
            Some(value) => value.parse().map_err(|_| {
                Error::metadata(format!("reference count {set}/{field} holds {value:?}"))
            }),
            None => Ok(0),
        }
    }

    /// Hosts (`<node>#<port>`) that have written to `set`
    pub fn set_hosts(&self, set: &SetName) -> Result<Vec<String>> {
        self.check_open()?;
        Ok(self.meta.smembers(&keys::set_hosts(set))?)
    }

    /// Release every resource, collecting failures instead of stopping
    ///
    /// Calling it again returns an empty report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return report;
        }

        for (set, result) in self.writers.close_all() {
            report.write_contexts_closed += 1;
            if let Err(e) = result {
                report.failures.push((format!("write context {set}"), e));
            }
        }
        report.read_handles_closed = self.handles.close_all();
        if let Err(e) = self.meta.close() {
            report.failures.push(("metadata store".to_string(), e.into()));
        }

        for (resource, e) in &report.failures {
            warn!("shutdown: failed to close {}: {}", resource, e);
        }
        info!(
            "Storage engine shut down: {} write contexts, {} read handles, {} failures",
            report.write_contexts_closed,
            report.read_handles_closed,
            report.failures.len()
        );
        report
    }
}

/// Hashes become hash fields next to `r.<hash>` counters and parts of
/// `<set>#<hash>` cache keys
fn check_hash(hash: &str) -> Result<()> {
    if hash.is_empty() {
        return Err(Error::invalid_argument("content hash must not be empty"));
    }
    if hash.starts_with("r.") {
        return Err(Error::invalid_argument(format!(
            "content hash {hash:?} collides with reference counters"
        )));
    }
    if let Some(c) = hash.chars().find(|c| matches!(c, '#' | '\0')) {
        return Err(Error::invalid_argument(format!(
            "content hash {hash:?} contains {c:?}"
        )));
    }
    Ok(())
}
