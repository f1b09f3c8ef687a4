//! Metadata store key conventions
//!
//! | Key                       | Kind   | Value                         |
//! |---------------------------|--------|-------------------------------|
//! | `<set>.blk.<node>`        | string | current block id of the node  |
//! | `<set>.srvs`              | set    | `<node>#<port>` host ids      |
//! | `<set>` / `<hash>`        | hash   | location descriptor           |
//! | `<set>` / `r.<hash>`      | hash   | reference count               |

use crate::types::SetName;

/// Block cursor key for a (set, node) pair
#[must_use]
pub fn block_cursor(set: &SetName, node: &str) -> String {
    format!("{set}.blk.{node}")
}

/// Key of the set holding every host of a set
#[must_use]
pub fn set_hosts(set: &SetName) -> String {
    format!("{set}.srvs")
}

/// Hash key holding the content records of a set
#[must_use]
pub fn content_hash(set: &SetName) -> String {
    set.as_str().to_string()
}

/// Hash field counting write attempts for a content hash
#[must_use]
pub fn reference_field(hash: &str) -> String {
    format!("r.{hash}")
}

/// Lookup cache key for a content hash within a set
///
/// Joined with `#`, which neither set names nor content hashes may contain,
/// so distinct pairs never share a key.
#[must_use]
pub fn lookup(set: &SetName, hash: &str) -> String {
    format!("{set}#{hash}")
}
