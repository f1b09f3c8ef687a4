//! Location descriptors
//!
//! A location descriptor is the durable address of a stored object. Its wire
//! form is seven `#`-delimited fields:
//!
//! ```text
//! type#set#node#port#block#offset#length
//! ```
//!
//! The same string is the value of a content record in the metadata store,
//! so formatting and parsing must round-trip exactly. Callers parse once into
//! [`LocationDescriptor`] and work with the typed fields afterwards.

use crate::error::{Error, Result};
use crate::types::{NodeIdentity, SetName};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Schema marker carried in the first descriptor field
pub const DESCRIPTOR_TYPE: u32 = 1;

/// Field delimiter of the descriptor wire format
pub const FIELD_DELIMITER: char = '#';

/// Number of fields in a descriptor
pub const FIELD_COUNT: usize = 7;

/// Typed form of a location descriptor
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocationDescriptor {
    /// Set the object belongs to
    pub set: SetName,
    /// Node that physically hosts the block
    pub node: String,
    /// Listening port of the hosting node
    pub port: u16,
    /// Block id within (set, node)
    pub block: u64,
    /// Byte offset of the object within the block
    pub offset: u64,
    /// Object length in bytes
    pub length: u64,
}

impl LocationDescriptor {
    /// Build a descriptor for an object hosted by `node`
    #[must_use]
    pub fn new(set: SetName, node: &NodeIdentity, block: u64, offset: u64, length: u64) -> Self {
        Self {
            set,
            node: node.name.clone(),
            port: node.port,
            block,
            offset,
            length,
        }
    }

    /// Path of the block file relative to the storage root
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        block_relative_path(&self.set, self.block)
    }

    /// Offset one past the last byte of the object
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Check whether the object lives on the given node
    #[must_use]
    pub fn is_hosted_by(&self, node: &NodeIdentity) -> bool {
        self.node == node.name && self.port == node.port
    }
}

/// File name of a block (`b<id>`)
#[must_use]
pub fn block_file_name(block: u64) -> String {
    format!("b{block}")
}

/// Path of a block file relative to the storage root (`<set>/b<id>`)
#[must_use]
pub fn block_relative_path(set: &SetName, block: u64) -> PathBuf {
    PathBuf::from(set.as_str()).join(block_file_name(block))
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DESCRIPTOR_TYPE}#{}#{}#{}#{}#{}#{}",
            self.set, self.node, self.port, self.block, self.offset, self.length
        )
    }
}

impl FromStr for LocationDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(FIELD_DELIMITER).collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::invalid_descriptor(
                s,
                format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
            ));
        }

        let kind: u32 = parse_field(s, "type", fields[0])?;
        if kind != DESCRIPTOR_TYPE {
            return Err(Error::invalid_descriptor(
                s,
                format!("unsupported descriptor type {kind}"),
            ));
        }

        let set = SetName::new(fields[1]).map_err(|e| Error::invalid_descriptor(s, e.to_string()))?;
        if fields[2].is_empty() {
            return Err(Error::invalid_descriptor(s, "empty node field"));
        }

        let descriptor = Self {
            set,
            node: fields[2].to_string(),
            port: parse_field(s, "port", fields[3])?,
            block: parse_field(s, "block", fields[4])?,
            offset: parse_field(s, "offset", fields[5])?,
            length: parse_field(s, "length", fields[6])?,
        };

        if descriptor.offset.checked_add(descriptor.length).is_none() {
            return Err(Error::invalid_descriptor(s, "offset + length overflows"));
        }

        Ok(descriptor)
    }
}

fn parse_field<T: FromStr>(descriptor: &str, name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::invalid_descriptor(descriptor, format!("bad {name} field {value:?}: {e}")))
}
