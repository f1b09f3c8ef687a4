//! Packstore Storage Engine - deduplicating small-object store
//!
//! This crate implements the storage engine for packstore including:
//! - Append-only block files per set, with size-based rollover
//! - Content-hash deduplication recorded in a shared metadata store
//! - Descriptor lookup caching with a time-to-live
//! - A bounded registry of open read handles
//! - Set deletion and orderly shutdown

pub mod block_file;
pub mod engine;
pub mod handles;
pub mod layout;
pub mod lookup;
pub mod stats;
pub mod writer;

// Re-exports
pub use block_file::BlockFile;
pub use engine::{ShutdownReport, StorageEngine, StoreOutcome};
pub use handles::{HandleStats, ReadHandleRegistry};
pub use layout::StorageLayout;
pub use lookup::{LookupCache, LookupStats, TtlLookupCache};
pub use stats::{EngineStats, StatsSnapshot};
pub use writer::{BlockSlot, WriteContext, WriteContexts};
