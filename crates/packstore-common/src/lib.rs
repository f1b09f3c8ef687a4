//! Packstore Common - Shared types and utilities
//!
//! This crate provides the error type, configuration, set names, location
//! descriptors and metadata key conventions used across all packstore
//! components.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod keys;
pub mod types;

pub use config::{Config, LookupCacheConfig, MetadataConfig, NodeConfig, StorageConfig};
pub use descriptor::{DESCRIPTOR_TYPE, LocationDescriptor};
pub use error::{Error, Result};
pub use types::{NodeIdentity, SetName, SetNameError};
