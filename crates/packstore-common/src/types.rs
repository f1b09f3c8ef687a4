//! Core type definitions for packstore
//!
//! This module defines the set name and node identity types shared by the
//! engine and the metadata key conventions.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a logical collection of stored objects
///
/// A set maps one-to-one to a subdirectory of the storage root, and its name
/// is embedded in metadata keys and location descriptors.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct SetName(String);

impl SetName {
    /// Create a new set name
    pub fn new(name: impl Into<String>) -> Result<Self, SetNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the set name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), SetNameError> {
        if name.is_empty() {
            return Err(SetNameError::Empty);
        }

        // Would resolve to the storage root or its parent
        if name == "." || name == ".." {
            return Err(SetNameError::Reserved(name.to_string()));
        }

        // '#' delimits descriptor fields, the rest would escape the set directory
        for c in name.chars() {
            if matches!(c, '#' | '/' | '\\' | '\0') {
                return Err(SetNameError::InvalidChar(c));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetName({:?})", self.0)
    }
}

impl AsRef<str> for SetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SetName {
    type Error = SetNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Errors that can occur when creating a set name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetNameError {
    #[error("set name cannot be empty")]
    Empty,
    #[error("set name {0:?} is reserved")]
    Reserved(String),
    #[error("set name contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Identity of the node hosting an engine
///
/// The port is the listening port of the serving process. The engine never
/// binds it; it is only embedded into location descriptors and host records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Node name
    pub name: String,
    /// Listening port of the serving process
    pub port: u16,
}

impl NodeIdentity {
    /// Create a node identity
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Host identifier recorded in a set's host list (`<node>#<port>`)
    #[must_use]
    pub fn host_id(&self) -> String {
        format!("{}#{}", self.name, self.port)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_set_names() {
        assert!(SetName::new("photos").is_ok());
        assert!(SetName::new("2024.q1-thumbs").is_ok());
        assert!(SetName::new("a").is_ok());
    }

    #[test]
    fn test_invalid_set_names() {
        assert_eq!(SetName::new(""), Err(SetNameError::Empty));
        assert!(matches!(SetName::new(".."), Err(SetNameError::Reserved(_))));
        assert_eq!(SetName::new("a#b"), Err(SetNameError::InvalidChar('#')));
        assert_eq!(SetName::new("../etc"), Err(SetNameError::InvalidChar('/')));
        assert_eq!(SetName::new("a\\b"), Err(SetNameError::InvalidChar('\\')));
    }

    #[test]
    fn test_host_id() {
        let node = NodeIdentity::new("node1", 9000);
        assert_eq!(node.host_id(), "node1#9000");
        assert_eq!(node.to_string(), "node1:9000");
    }
}
