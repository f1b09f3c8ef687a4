//! Packstore Metadata Store - shared coordination store
//!
//! This crate defines the key-value capability engines coordinate through
//! (string keys, sets, hashes and an atomic pipeline), plus two backends:
//! a persistent redb store and an in-process store.

pub mod memory;
pub mod ops;
pub mod redb_store;
pub mod store;
pub mod tables;

// Re-exports
pub use memory::MemoryMetaStore;
pub use ops::{MetaOp, MetaReply};
pub use redb_store::RedbMetaStore;
pub use store::{MetaStoreError, MetaStoreResult, MetadataStore};
