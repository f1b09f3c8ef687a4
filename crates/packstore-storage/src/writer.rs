//! Per-set write contexts
//!
//! Each set written by this process owns one [`WriteContext`]: the current
//! block id, its open file and the append offset. A context sits behind its
//! own mutex, held across the whole acquire-and-append sequence, so appends
//! to one set are serialized while different sets proceed in parallel.
//!
//! The block cursor `<set>.blk.<node>` in the metadata store is the durable
//! half of this state. On first use the context adopts the cursor and resumes
//! at the end of that block; rollover advances the cursor with an atomic
//! increment and adopts the returned id. An id claimed by a rollover whose
//! block failed to open is kept and reused by the next attempt, so failures
//! never skip a block id.

use crate::block_file::BlockFile;
use crate::layout::StorageLayout;
use dashmap::DashMap;
use packstore_common::{Error, NodeIdentity, Result, SetName, keys};
use packstore_meta_store::{MetaOp, MetadataStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Where an append landed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSlot {
    pub block: u64,
    pub offset: u64,
    pub length: u64,
    /// The append moved the set to a new block
    pub rolled_over: bool,
}

struct OpenBlock {
    id: u64,
    file: BlockFile,
    offset: u64,
}

/// Append state of one set on this node
pub struct WriteContext {
    set: SetName,
    current: Option<OpenBlock>,
    /// Block id already taken from the cursor but not yet opened
    claimed: Option<u64>,
    retired: bool,
}

impl WriteContext {
    fn new(set: SetName) -> Self {
        Self {
            set,
            current: None,
            claimed: None,
            retired: false,
        }
    }

    /// Current block id and append offset, if a block is open
    pub fn position(&self) -> Option<(u64, u64)> {
        self.current.as_ref().map(|b| (b.id, b.offset))
    }

    /// Make block `id` current, returning its append offset
    fn open_block(&mut self, layout: &StorageLayout, id: u64) -> Result<u64> {
        let file = BlockFile::open_writable(layout.block_path(&self.set, id))?;
        // Resume after whatever the block already holds
        let offset = file.len()?;
        self.current = Some(OpenBlock { id, file, offset });
        Ok(offset)
    }

    /// Adopt the block cursor, registering the set on first use
    fn ensure_open(
        &mut self,
        meta: &dyn MetadataStore,
        layout: &StorageLayout,
        node: &NodeIdentity,
    ) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        let cursor_key = keys::block_cursor(&self.set, &node.name);
        std::fs::create_dir_all(layout.set_dir(&self.set))?;

        let id = match meta.get(&cursor_key)? {
            Some(value) => {
                let id = parse_block_id(&cursor_key, &value)?;
                debug!("set {}: resuming at block {}", self.set, id);
                id
            }
            None => {
                meta.execute(vec![
                    MetaOp::sadd(keys::set_hosts(&self.set), node.host_id()),
                    MetaOp::set(cursor_key, "0"),
                ])?;
                info!("set {}: registered host {}", self.set, node.host_id());
                0
            }
        };
        let offset = self.open_block(layout, id)?;
        debug!("set {}: block {} open at offset {}", self.set, id, offset);
        Ok(())
    }

    /// Advance the cursor and switch to the block it names
    fn roll_over(
        &mut self,
        meta: &dyn MetadataStore,
        layout: &StorageLayout,
        node: &NodeIdentity,
    ) -> Result<()> {
        let previous = self.current.as_ref().map(|b| b.id);
        let next = match self.claimed {
            Some(id) => {
                debug!("set {}: retrying claimed block {}", self.set, id);
                id
            }
            None => {
                let cursor_key = keys::block_cursor(&self.set, &node.name);
                let next = meta.incr(&cursor_key)?;
                let next = u64::try_from(next)
                    .ok()
                    .filter(|id| previous.is_none_or(|prev| *id > prev))
                    .ok_or_else(|| {
                        Error::metadata(format!(
                            "block cursor {cursor_key} moved to {next} from {previous:?}"
                        ))
                    })?;
                self.claimed = Some(next);
                next
            }
        };

        // The old handle closes when replaced
        let offset = self.open_block(layout, next)?;
        self.claimed = None;
        info!(
            "set {}: rolled over from block {:?} to {} (offset {})",
            self.set, previous, next, offset
        );
        Ok(())
    }

    /// Pick the block for an object of `length` bytes, rolling over when the
    /// open block already holds data and the object would cross `block_size`
    fn acquire(
        &mut self,
        meta: &dyn MetadataStore,
        layout: &StorageLayout,
        node: &NodeIdentity,
        block_size: u64,
        length: u64,
    ) -> Result<bool> {
        self.ensure_open(meta, layout, node)?;
        let needs_rollover = self
            .current
            .as_ref()
            .is_some_and(|b| b.offset > 0 && b.offset.saturating_add(length) > block_size);
        if needs_rollover {
            self.roll_over(meta, layout, node)?;
        }
        Ok(needs_rollover)
    }

    fn append(
        &mut self,
        meta: &dyn MetadataStore,
        layout: &StorageLayout,
        node: &NodeIdentity,
        block_size: u64,
        data: &[u8],
    ) -> Result<BlockSlot> {
        let length = data.len() as u64;
        let rolled_over = self.acquire(meta, layout, node, block_size, length)?;
        let block = self
            .current
            .as_mut()
            .ok_or_else(|| Error::metadata(format!("set {}: no open block", self.set)))?;

        block.file.write_all_at(block.offset, data)?;
        let slot = BlockSlot {
            block: block.id,
            offset: block.offset,
            length,
            rolled_over,
        };
        block.offset += length;
        Ok(slot)
    }

    /// Sync and drop the open block; the context refuses further appends
    fn close(&mut self) -> Result<()> {
        self.retired = true;
        match self.current.take() {
            Some(block) => block.file.sync(),
            None => Ok(()),
        }
    }

    fn retire(&mut self) {
        self.retired = true;
        self.current = None;
        self.claimed = None;
    }
}

fn parse_block_id(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::metadata(format!("block cursor {key} holds {value:?}")))
}

/// Registry of write contexts, one per set, created by the first writer
pub struct WriteContexts {
    contexts: DashMap<SetName, Arc<Mutex<WriteContext>>>,
    meta: Arc<dyn MetadataStore>,
    layout: StorageLayout,
    node: NodeIdentity,
    block_size: u64,
    closed: AtomicBool,
}

impl WriteContexts {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        layout: StorageLayout,
        node: NodeIdentity,
        block_size: u64,
    ) -> Self {
        Self {
            contexts: DashMap::new(),
            meta,
            layout,
            node,
            block_size,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Current block id and offset of a set, if it has an open block
    pub fn position(&self, set: &SetName) -> Option<(u64, u64)> {
        let ctx = self.contexts.get(set).map(|r| Arc::clone(r.value()))?;
        let guard = ctx.lock();
        guard.position()
    }

    fn context(&self, set: &SetName) -> Arc<Mutex<WriteContext>> {
        Arc::clone(
            self.contexts
                .entry(set.clone())
                .or_insert_with(|| Arc::new(Mutex::new(WriteContext::new(set.clone()))))
                .value(),
        )
    }

    /// Append `data` to the set's current block
    pub fn append(&self, set: &SetName, data: &[u8]) -> Result<BlockSlot> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ShutDown);
            }
            let ctx = self.context(set);
            let mut guard = ctx.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::ShutDown);
            }
            if guard.retired {
                // Deleted while we waited; the next lookup creates a fresh one
                continue;
            }
            return guard.append(
                self.meta.as_ref(),
                &self.layout,
                &self.node,
                self.block_size,
                data,
            );
        }
    }

    /// Run `f` while holding the set's context lock, then drop the context
    ///
    /// Appends queued behind the lock start over with a new context, which
    /// re-reads the block cursor.
    pub fn retire<T>(&self, set: &SetName, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let ctx = self.context(set);
        let mut guard = ctx.lock();
        let result = f();
        guard.retire();
        self.contexts.remove_if(set, |_, v| Arc::ptr_eq(v, &ctx));
        result
    }

    /// Sync and close every context; later appends fail with
    /// [`Error::ShutDown`]
    pub fn close_all(&self) -> Vec<(SetName, Result<()>)> {
        self.closed.store(true, Ordering::SeqCst);
        let contexts: Vec<_> = self
            .contexts
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        let mut results = Vec::with_capacity(contexts.len());
        for (set, ctx) in contexts {
            let result = ctx.lock().close();
            self.contexts.remove_if(&set, |_, v| Arc::ptr_eq(v, &ctx));
            results.push((set, result));
        }
        results
    }
}
