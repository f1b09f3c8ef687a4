//! Configuration types for packstore
//!
//! The engine consumes an already-loaded [`Config`]; reading it from disk is
//! the job of the hosting process.

use crate::error::{Error, Result};
use crate::types::NodeIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for packstore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Block storage configuration
    pub storage: StorageConfig,
    /// Metadata store configuration
    pub metadata: MetadataConfig,
    /// Lookup cache configuration
    pub lookup_cache: LookupCacheConfig,
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            return Err(Error::configuration("node.name must not be empty"));
        }
        // '#' splits descriptors and host ids; '.' splits cursor keys
        if let Some(c) = self.node.name.chars().find(|c| matches!(c, '#' | '.')) {
            return Err(Error::configuration(format!(
                "node.name {:?} must not contain {c:?}",
                self.node.name
            )));
        }
        if self.storage.root.as_os_str().is_empty() {
            return Err(Error::configuration("storage.root must not be empty"));
        }
        if self.storage.block_size == 0 {
            return Err(Error::configuration("storage.block_size must be positive"));
        }
        if self.storage.read_handle_capacity == 0 {
            return Err(Error::configuration(
                "storage.read_handle_capacity must be positive",
            ));
        }
        if self.lookup_cache.ttl_secs == 0 {
            return Err(Error::configuration("lookup_cache.ttl_secs must be positive"));
        }
        Ok(())
    }

    /// Identity of the local node
    #[must_use]
    pub fn node_identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.node.name.clone(), self.node.port)
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, unique across the cluster
    pub name: String,
    /// Listening port of the serving process (embedded in descriptors)
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "packstore-node".to_string(),
            port: 30303,
        }
    }
}

/// Block storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each set gets a subdirectory
    pub root: PathBuf,
    /// Rollover threshold for block files (default: 64 MB)
    pub block_size: u64,
    /// Maximum number of open read handles
    pub read_handle_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./mm_data"),
            block_size: 64 * 1024 * 1024, // 64 MB
            read_handle_capacity: 1024,
        }
    }
}

/// Metadata store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Path of the metadata database
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./mm_data/meta.redb"),
        }
    }
}

/// Lookup cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupCacheConfig {
    /// Maximum number of cached descriptors
    pub capacity: usize,
    /// Time-to-live of a cached descriptor (seconds)
    pub ttl_secs: u64,
    /// Minimum interval between expiry sweeps (seconds)
    pub cleanup_interval_secs: u64,
}

impl LookupCacheConfig {
    /// Time-to-live as a duration
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval as a duration
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for LookupCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}
