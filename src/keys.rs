//! Namespace Key Scheme
//!
//! Maps `(collection kind, namespace)` to the durable-store key that holds the
//! whole collection: `"<kind>:<namespace>"`.
//!
//! The namespace is not escaped. A namespace containing `:` still produces a
//! unique key because the kind prefix always ends at the first separator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between kind and namespace in a durable key
pub const KEY_SEPARATOR: char = ':';

/// The resource collections known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Levels,
    Websites,
    Platforms,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [
        CollectionKind::Levels,
        CollectionKind::Websites,
        CollectionKind::Platforms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Levels => "levels",
            CollectionKind::Websites => "websites",
            CollectionKind::Platforms => "platforms",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| KeyError::UnknownKind(s.to_string()))
    }
}

/// Error parsing a durable key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key has no kind separator
    MissingSeparator(String),
    /// Prefix is not a known collection kind
    UnknownKind(String),
    /// Namespace part is empty
    EmptyNamespace(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::MissingSeparator(key) => write!(f, "Key has no separator: {}", key),
            KeyError::UnknownKind(kind) => write!(f, "Unknown collection kind: {}", kind),
            KeyError::EmptyNamespace(key) => write!(f, "Key has an empty namespace: {}", key),
        }
    }
}

impl std::error::Error for KeyError {}

/// Identity of one collection instance: `(kind, namespace)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    kind: CollectionKind,
    namespace: String,
}

impl CollectionKey {
    pub fn new(kind: CollectionKind, namespace: impl Into<String>) -> Self {
        CollectionKey {
            kind,
            namespace: namespace.into(),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of another collection kind in the same namespace
    pub fn sibling(&self, kind: CollectionKind) -> Self {
        CollectionKey::new(kind, self.namespace.clone())
    }

    /// The durable-store key for this collection
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, KEY_SEPARATOR, self.namespace)
    }
}

impl FromStr for CollectionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, namespace) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| KeyError::MissingSeparator(s.to_string()))?;
        if namespace.is_empty() {
            return Err(KeyError::EmptyNamespace(s.to_string()));
        }
        Ok(CollectionKey::new(kind.parse()?, namespace))
    }
}
