//! The metadata store capability.
//!
//! The engine only talks to [`MetadataStore`]. Backends implement
//! [`MetadataStore::execute`], which must apply a whole pipeline atomically;
//! the single-operation helpers are thin wrappers around it.

use crate::ops::{MetaOp, MetaReply};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("value is not an integer: {0}")]
    NotAnInteger(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("metadata store is closed")]
    Closed,
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<MetaStoreError> for packstore_common::Error {
    fn from(e: MetaStoreError) -> Self {
        Self::MetadataStore(e.to_string())
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

/// Shared key-value store used to coordinate engines
///
/// Implementations must be safe to call from many threads at once.
pub trait MetadataStore: Send + Sync {
    /// Execute a pipeline atomically, returning one reply per operation in
    /// issue order. Either every operation is applied or none is.
    fn execute(&self, ops: Vec<MetaOp>) -> MetaStoreResult<Vec<MetaReply>>;

    /// Release the connection. Later calls fail with [`MetaStoreError::Closed`].
    fn close(&self) -> MetaStoreResult<()>;

    fn get(&self, key: &str) -> MetaStoreResult<Option<String>> {
        self.execute_one(MetaOp::get(key))?.into_value()
    }

    fn set(&self, key: &str, value: &str) -> MetaStoreResult<()> {
        self.execute_one(MetaOp::set(key, value)).map(|_| ())
    }

    fn incr(&self, key: &str) -> MetaStoreResult<i64> {
        self.execute_one(MetaOp::incr(key))?.into_int()
    }

    fn sadd(&self, key: &str, member: &str) -> MetaStoreResult<bool> {
        Ok(self.execute_one(MetaOp::sadd(key, member))?.into_int()? == 1)
    }

    fn smembers(&self, key: &str) -> MetaStoreResult<Vec<String>> {
        self.execute_one(MetaOp::smembers(key))?.into_members()
    }

    fn hget(&self, key: &str, field: &str) -> MetaStoreResult<Option<String>> {
        self.execute_one(MetaOp::hget(key, field))?.into_value()
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> MetaStoreResult<bool> {
        Ok(self.execute_one(MetaOp::hsetnx(key, field, value))?.into_int()? == 1)
    }

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> MetaStoreResult<i64> {
        self.execute_one(MetaOp::hincrby(key, field, delta))?.into_int()
    }

    #[doc(hidden)]
    fn execute_one(&self, op: MetaOp) -> MetaStoreResult<MetaReply> {
        self.execute(vec![op])?
            .pop()
            .ok_or_else(|| MetaStoreError::UnexpectedReply("empty pipeline reply".into()))
    }
}
