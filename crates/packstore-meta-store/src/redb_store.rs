//! Persistent metadata store backed by redb.
//!
//! A pipeline runs inside a single write transaction which commits only if
//! every operation succeeded, so other readers never observe a partially
//! applied pipeline. Single reads go through read transactions.

use crate::ops::{KvTables, MetaOp, MetaReply, apply, composite, composite_prefix};
use crate::store::{MetaStoreError, MetaStoreResult, MetadataStore};
use crate::tables;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, Table};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persistent metadata store backed by redb.
pub struct RedbMetaStore {
    db: RwLock<Option<Database>>,
    path: PathBuf,
}

impl RedbMetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::STRINGS)?;
            let _t = write_txn.open_table(tables::HASH_FIELDS)?;
            let _t = write_txn.open_table(tables::SET_MEMBERS)?;
        }
        write_txn.commit()?;

        info!("Opened metadata store at {:?}", path);
        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path.to_path_buf(),
        })
    }

    /// Path of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> MetaStoreResult<T>) -> MetaStoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(MetaStoreError::Closed)?;
        f(db)
    }
}

impl MetadataStore for RedbMetaStore {
    fn execute(&self, ops: Vec<MetaOp>) -> MetaStoreResult<Vec<MetaReply>> {
        self.with_db(|db| {
            let write_txn = db.begin_write()?;
            let result = {
                let mut txn_tables = WriteTables {
                    strings: write_txn.open_table(tables::STRINGS)?,
                    fields: write_txn.open_table(tables::HASH_FIELDS)?,
                    members: write_txn.open_table(tables::SET_MEMBERS)?,
                };
                ops.iter()
                    .map(|op| apply(&mut txn_tables, op))
                    .collect::<MetaStoreResult<Vec<_>>>()
            };
            match result {
                Ok(replies) if ops.iter().all(MetaOp::is_read) => {
                    // Nothing to persist, skip the durable commit
                    write_txn.abort()?;
                    Ok(replies)
                }
                Ok(replies) => {
                    write_txn.commit()?;
                    debug!("pipeline: {} ops committed", replies.len());
                    Ok(replies)
                }
                Err(e) => {
                    write_txn.abort()?;
                    Err(e)
                }
            }
        })
    }

    fn close(&self) -> MetaStoreResult<()> {
        if self.db.write().take().is_some() {
            info!("Closed metadata store at {:?}", self.path);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> MetaStoreResult<Option<String>> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(tables::STRINGS)?;
            read_string(&table, key)
        })
    }

    fn hget(&self, key: &str, field: &str) -> MetaStoreResult<Option<String>> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(tables::HASH_FIELDS)?;
            read_string(&table, &composite(key, field))
        })
    }

    fn smembers(&self, key: &str) -> MetaStoreResult<Vec<String>> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(tables::SET_MEMBERS)?;
            read_members(&table, key)
        })
    }
}

/// Tables opened inside one write transaction
struct WriteTables<'txn> {
    strings: Table<'txn, &'static str, &'static str>,
    fields: Table<'txn, &'static str, &'static str>,
    members: Table<'txn, &'static str, ()>,
}

impl KvTables for WriteTables<'_> {
    fn string(&self, key: &str) -> MetaStoreResult<Option<String>> {
        read_string(&self.strings, key)
    }

    fn put_string(&mut self, key: &str, value: &str) -> MetaStoreResult<()> {
        self.strings.insert(key, value)?;
        Ok(())
    }

    fn field(&self, key: &str, field: &str) -> MetaStoreResult<Option<String>> {
        read_string(&self.fields, &composite(key, field))
    }

    fn put_field(&mut self, key: &str, field: &str, value: &str) -> MetaStoreResult<()> {
        self.fields.insert(composite(key, field).as_str(), value)?;
        Ok(())
    }

    fn add_member(&mut self, key: &str, member: &str) -> MetaStoreResult<bool> {
        let previous = self.members.insert(composite(key, member).as_str(), ())?;
        Ok(previous.is_none())
    }

    fn members(&self, key: &str) -> MetaStoreResult<Vec<String>> {
        read_members(&self.members, key)
    }
}

fn read_string(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> MetaStoreResult<Option<String>> {
    Ok(table.get(key)?.map(|v| v.value().to_string()))
}

fn read_members(
    table: &impl ReadableTable<&'static str, ()>,
    key: &str,
) -> MetaStoreResult<Vec<String>> {
    let prefix = composite_prefix(key);
    let mut result = Vec::new();
    for entry in table.range(prefix.as_str()..)? {
        let entry = entry?;
        let composite_key = entry.0.value();
        match composite_key.strip_prefix(prefix.as_str()) {
            Some(member) => result.push(member.to_string()),
            None => break,
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RedbMetaStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbMetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_strings_and_counters() {
        let (_dir, store) = open_temp();
        assert_eq!(store.get("photos.blk.node1").unwrap(), None);
        store.set("photos.blk.node1", "0").unwrap();
        assert_eq!(store.incr("photos.blk.node1").unwrap(), 1);
        assert_eq!(store.incr("photos.blk.node1").unwrap(), 2);
        assert_eq!(store.get("photos.blk.node1").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_hash_fields() {
        let (_dir, store) = open_temp();
        assert!(store.hsetnx("photos", "abc", "1#photos#n#1#0#0#5").unwrap());
        assert!(!store.hsetnx("photos", "abc", "1#photos#n#1#0#5#5").unwrap());
        assert_eq!(
            store.hget("photos", "abc").unwrap().as_deref(),
            Some("1#photos#n#1#0#0#5")
        );
        assert_eq!(store.hincrby("photos", "r.abc", 1).unwrap(), 1);
        assert_eq!(store.hincrby("photos", "r.abc", 1).unwrap(), 2);
        assert_eq!(store.hget("other", "abc").unwrap(), None);
    }

    #[test]
    fn test_set_members_do_not_leak_across_keys() {
        let (_dir, store) = open_temp();
        assert!(store.sadd("a.srvs", "node1#9000").unwrap());
        assert!(!store.sadd("a.srvs", "node1#9000").unwrap());
        assert!(store.sadd("a.srvs", "node2#9000").unwrap());
        assert!(store.sadd("a.srvsx", "node3#9000").unwrap());
        assert!(store.sadd("b.srvs", "node4#9000").unwrap());
        assert_eq!(
            store.smembers("a.srvs").unwrap(),
            vec!["node1#9000".to_string(), "node2#9000".to_string()]
        );
        assert!(store.smembers("c.srvs").unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_replies_in_order() {
        let (_dir, store) = open_temp();
        let replies = store
            .execute(vec![
                MetaOp::hincrby("photos", "r.abc", 1),
                MetaOp::hsetnx("photos", "abc", "loc"),
                MetaOp::hget("photos", "abc"),
            ])
            .unwrap();
        assert_eq!(
            replies,
            vec![
                MetaReply::Int(1),
                MetaReply::Int(1),
                MetaReply::Value(Some("loc".into()))
            ]
        );
    }

    #[test]
    fn test_failed_pipeline_is_not_applied() {
        let (_dir, store) = open_temp();
        store.set("counter", "not-a-number").unwrap();
        let result = store.execute(vec![
            MetaOp::hsetnx("photos", "abc", "loc"),
            MetaOp::incr("counter"),
        ]);
        assert!(matches!(result, Err(MetaStoreError::NotAnInteger(_))));
        assert_eq!(store.hget("photos", "abc").unwrap(), None);
    }

    #[test]
    fn test_reopen_and_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("meta.redb");
        {
            let store = RedbMetaStore::open(&path).unwrap();
            store.set("k", "v").unwrap();
            store.close().unwrap();
            assert!(matches!(store.get("k"), Err(MetaStoreError::Closed)));
            assert!(matches!(
                store.execute(vec![MetaOp::get("k")]),
                Err(MetaStoreError::Closed)
            ));
        }
        let store = RedbMetaStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
