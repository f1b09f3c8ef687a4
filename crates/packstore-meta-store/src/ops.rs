//! Pipeline operations and their replies.
//!
//! Every store executes a `Vec<MetaOp>` as one atomic unit and answers with
//! one [`MetaReply`] per operation, in issue order. The operation semantics
//! are shared by all backends through [`KvTables`] and [`apply`].

use crate::store::{MetaStoreError, MetaStoreResult};

/// A single metadata operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaOp {
    /// Read a string key
    Get { key: String },
    /// Overwrite a string key
    Set { key: String, value: String },
    /// Increment an integer string key by one, starting from zero
    Incr { key: String },
    /// Add a member to a set key
    SAdd { key: String, member: String },
    /// List the members of a set key
    SMembers { key: String },
    /// Read a hash field
    HGet { key: String, field: String },
    /// Write a hash field only if it does not exist yet
    HSetNx {
        key: String,
        field: String,
        value: String,
    },
    /// Add `delta` to an integer hash field, starting from zero
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
}

impl MetaOp {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn incr(key: impl Into<String>) -> Self {
        Self::Incr { key: key.into() }
    }

    pub fn sadd(key: impl Into<String>, member: impl Into<String>) -> Self {
        Self::SAdd {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn smembers(key: impl Into<String>) -> Self {
        Self::SMembers { key: key.into() }
    }

    pub fn hget(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::HGet {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn hsetnx(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::HSetNx {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hincrby(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        Self::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }

    /// Whether the operation leaves the store unchanged
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(
            self,
            Self::Get { .. } | Self::SMembers { .. } | Self::HGet { .. }
        )
    }
}

/// Reply to a single metadata operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaReply {
    /// The write was applied
    Ok,
    /// Integer result (counters, and 1/0 for set-if-absent and set-add)
    Int(i64),
    /// Value of a string key or hash field
    Value(Option<String>),
    /// Members of a set key, sorted
    Members(Vec<String>),
}

impl MetaReply {
    pub fn into_int(self) -> MetaStoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(MetaStoreError::UnexpectedReply(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    pub fn into_value(self) -> MetaStoreResult<Option<String>> {
        match self {
            Self::Value(v) => Ok(v),
            other => Err(MetaStoreError::UnexpectedReply(format!(
                "expected value, got {other:?}"
            ))),
        }
    }

    pub fn into_members(self) -> MetaStoreResult<Vec<String>> {
        match self {
            Self::Members(m) => Ok(m),
            other => Err(MetaStoreError::UnexpectedReply(format!(
                "expected members, got {other:?}"
            ))),
        }
    }
}

/// Storage primitives a backend exposes to the shared op semantics
pub(crate) trait KvTables {
    fn string(&self, key: &str) -> MetaStoreResult<Option<String>>;
    fn put_string(&mut self, key: &str, value: &str) -> MetaStoreResult<()>;
    fn field(&self, key: &str, field: &str) -> MetaStoreResult<Option<String>>;
    fn put_field(&mut self, key: &str, field: &str, value: &str) -> MetaStoreResult<()>;
    /// Returns true if the member was not present before
    fn add_member(&mut self, key: &str, member: &str) -> MetaStoreResult<bool>;
    fn members(&self, key: &str) -> MetaStoreResult<Vec<String>>;
}

/// Apply one operation against a backend
pub(crate) fn apply(tables: &mut impl KvTables, op: &MetaOp) -> MetaStoreResult<MetaReply> {
    match op {
        MetaOp::Get { key } => Ok(MetaReply::Value(tables.string(key)?)),
        MetaOp::Set { key, value } => {
            tables.put_string(key, value)?;
            Ok(MetaReply::Ok)
        }
        MetaOp::Incr { key } => {
            let next = parse_counter(key, tables.string(key)?)? + 1;
            tables.put_string(key, &next.to_string())?;
            Ok(MetaReply::Int(next))
        }
        MetaOp::SAdd { key, member } => {
            let added = tables.add_member(key, member)?;
            Ok(MetaReply::Int(i64::from(added)))
        }
        MetaOp::SMembers { key } => Ok(MetaReply::Members(tables.members(key)?)),
        MetaOp::HGet { key, field } => Ok(MetaReply::Value(tables.field(key, field)?)),
        MetaOp::HSetNx { key, field, value } => {
            if tables.field(key, field)?.is_some() {
                return Ok(MetaReply::Int(0));
            }
            tables.put_field(key, field, value)?;
            Ok(MetaReply::Int(1))
        }
        MetaOp::HIncrBy { key, field, delta } => {
            let current = parse_counter(key, tables.field(key, field)?)?;
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| MetaStoreError::NotAnInteger(format!("{key}/{field} overflow")))?;
            tables.put_field(key, field, &next.to_string())?;
            Ok(MetaReply::Int(next))
        }
    }
}

fn parse_counter(key: &str, value: Option<String>) -> MetaStoreResult<i64> {
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| MetaStoreError::NotAnInteger(format!("{key} holds {v:?}"))),
    }
}

/// Composite key used by backends that flatten hashes and sets
pub(crate) fn composite(key: &str, sub: &str) -> String {
    format!("{key}\0{sub}")
}

/// Prefix shared by every composite key of `key`
pub(crate) fn composite_prefix(key: &str) -> String {
    format!("{key}\0")
}
