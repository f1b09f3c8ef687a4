//! Redb table definitions for persistent metadata storage.
//!
//! Hashes and sets are flattened into composite keys `<key>\0<field>` and
//! `<key>\0<member>` so one table serves every hash (or set) key.

use redb::TableDefinition;

// Plain string keys (block cursors)
pub const STRINGS: TableDefinition<&str, &str> = TableDefinition::new("strings");

// Key: "<key>\0<field>", Value: field value (descriptors, reference counts)
pub const HASH_FIELDS: TableDefinition<&str, &str> = TableDefinition::new("hash_fields");

// Key: "<key>\0<member>" (set hosts)
pub const SET_MEMBERS: TableDefinition<&str, ()> = TableDefinition::new("set_members");
