//! In-process metadata store.
//!
//! Keeps strings, hashes and sets in maps behind one mutex. A pipeline holds
//! the mutex for its whole run and records an undo log, so a failing
//! operation rolls back everything the pipeline already applied.

use crate::ops::{KvTables, MetaOp, MetaReply, apply};
use crate::store::{MetaStoreError, MetaStoreResult, MetadataStore};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

enum Undo {
    String { key: String, previous: Option<String> },
    Field {
        key: String,
        field: String,
        previous: Option<String>,
    },
    Member { key: String, member: String },
}

struct Staged<'a> {
    state: &'a mut State,
    undo: Vec<Undo>,
}

impl Staged<'_> {
    fn rollback(mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::String { key, previous } => match previous {
                    Some(v) => {
                        self.state.strings.insert(key, v);
                    }
                    None => {
                        self.state.strings.remove(&key);
                    }
                },
                Undo::Field {
                    key,
                    field,
                    previous,
                } => {
                    let hash = self.state.hashes.entry(key.clone()).or_default();
                    match previous {
                        Some(v) => {
                            hash.insert(field, v);
                        }
                        None => {
                            hash.remove(&field);
                        }
                    }
                    if hash.is_empty() {
                        self.state.hashes.remove(&key);
                    }
                }
                Undo::Member { key, member } => {
                    if let Some(set) = self.state.sets.get_mut(&key) {
                        set.remove(&member);
                        if set.is_empty() {
                            self.state.sets.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

impl KvTables for Staged<'_> {
    fn string(&self, key: &str) -> MetaStoreResult<Option<String>> {
        Ok(self.state.strings.get(key).cloned())
    }

    fn put_string(&mut self, key: &str, value: &str) -> MetaStoreResult<()> {
        let previous = self.state.strings.insert(key.to_string(), value.to_string());
        self.undo.push(Undo::String {
            key: key.to_string(),
            previous,
        });
        Ok(())
    }

    fn field(&self, key: &str, field: &str) -> MetaStoreResult<Option<String>> {
        Ok(self
            .state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn put_field(&mut self, key: &str, field: &str, value: &str) -> MetaStoreResult<()> {
        let previous = self
            .state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        self.undo.push(Undo::Field {
            key: key.to_string(),
            field: field.to_string(),
            previous,
        });
        Ok(())
    }

    fn add_member(&mut self, key: &str, member: &str) -> MetaStoreResult<bool> {
        let added = self
            .state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        if added {
            self.undo.push(Undo::Member {
                key: key.to_string(),
                member: member.to_string(),
            });
        }
        Ok(added)
    }

    fn members(&self, key: &str) -> MetaStoreResult<Vec<String>> {
        Ok(self
            .state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Metadata store living in process memory
///
/// Useful for tests and single-process deployments. Share it between engines
/// through an `Arc` to simulate several processes talking to one store.
#[derive(Default)]
pub struct MemoryMetaStore {
    state: Mutex<State>,
    closed: AtomicBool,
}

impl MemoryMetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept calls again after [`MetadataStore::close`]
    ///
    /// Closing only refuses further calls; the data survives so a test can
    /// model a restarted client against the same store.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

impl MetadataStore for MemoryMetaStore {
    fn execute(&self, ops: Vec<MetaOp>) -> MetaStoreResult<Vec<MetaReply>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetaStoreError::Closed);
        }
        let mut state = self.state.lock();
        let mut staged = Staged {
            state: &mut *state,
            undo: Vec::new(),
        };
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            match apply(&mut staged, op) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    staged.rollback();
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }

    fn close(&self) -> MetaStoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
