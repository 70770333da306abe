//! Last-write-wins key/value property set shared by descriptor and manifest.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by typed property accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyError {
    /// A mandatory property is absent.
    #[error("mandatory property '{0}' is missing")]
    Missing(String),
    /// A property value could not be parsed as a number.
    #[error("property '{key}' is not a non-negative integer: '{value}'")]
    NotANumber {
        /// Property key.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// An unordered set of string properties. Duplicate inserts overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    entries: HashMap<String, String>,
}

impl PropertySet {
    /// Create an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property, returning the previous value if the key existed.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.entries.insert(key, value)
    }

    /// Look up a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Look up a mandatory property value.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::Missing`] if the key is absent.
    pub fn require(&self, key: &str) -> Result<&str, PropertyError> {
        self.get(key)
            .ok_or_else(|| PropertyError::Missing(key.to_owned()))
    }

    /// Look up an optional numeric property.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NotANumber`] if the value is present but not
    /// a non-negative decimal integer.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, PropertyError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| PropertyError::NotANumber {
                    key: key.to_owned(),
                    value: raw.to_owned(),
                }),
        }
    }

    /// Look up a mandatory numeric property.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::Missing`] if absent or
    /// [`PropertyError::NotANumber`] if malformed.
    pub fn require_u64(&self, key: &str) -> Result<u64, PropertyError> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| PropertyError::NotANumber {
            key: key.to_owned(),
            value: raw.to_owned(),
        })
    }

    /// Whether the set contains the given key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of properties in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all (key, value) pairs in unspecified order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
