//! Validated newtype wrappers for core domain primitives.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a domain value fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The value is empty after trimming.
    #[error("value must not be empty")]
    Empty,
    /// The value exceeds the maximum length.
    #[error("value exceeds maximum length of {max} characters (got {got})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        got: usize,
    },
    /// The value contains a control character.
    #[error("value contains a control character")]
    ControlCharacter,
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The string is empty.
    #[error("version must not be empty")]
    Empty,
    /// The string has more than three dot-separated groups.
    #[error("version has {0} groups, maximum is 3")]
    TooManyGroups(usize),
    /// A group is empty (leading, trailing, or doubled dot).
    #[error("version contains an empty group")]
    EmptyGroup,
    /// A group is not a non-negative decimal integer.
    #[error("version group '{0}' is not a non-negative integer")]
    BadGroup(String),
}

const MAX_NAME_LEN: usize = 256;

fn check_display_text(value: &str) -> Result<&str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_NAME_LEN,
            got: trimmed.len(),
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter);
    }
    Ok(trimmed)
}

/// A validated suite name: trimmed, non-empty printable text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuiteName(String);

impl SuiteName {
    /// Create a new `SuiteName` from a string slice, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the trimmed name is empty, exceeds 256
    /// characters, or contains control characters.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        check_display_text(name).map(|s| Self(s.to_owned()))
    }

    /// Return the inner name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SuiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated vendor name (same constraints as [`SuiteName`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorName(String);

impl VendorName {
    /// Create a new `VendorName`, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the trimmed name is invalid per
    /// [`SuiteName`] rules.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        check_display_text(name).map(|s| Self(s.to_owned()))
    }

    /// Return the inner vendor string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A suite version: one to three dot-separated non-negative integer groups.
///
/// Comparison is component-wise with missing groups defaulting to zero, so
/// `1.4` and `1.4.0` are equal while `1.04` sorts before `1.4.1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SuiteVersion {
    parts: [u32; 3],
    groups: usize,
}

impl SuiteVersion {
    /// The three version components, missing groups as zero.
    #[must_use]
    pub fn parts(&self) -> [u32; 3] {
        self.parts
    }
}

impl FromStr for SuiteVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }
        let groups: Vec<&str> = s.split('.').collect();
        if groups.len() > 3 {
            return Err(VersionError::TooManyGroups(groups.len()));
        }
        let mut parts = [0u32; 3];
        for (i, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(VersionError::EmptyGroup);
            }
            if !group.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::BadGroup((*group).to_owned()));
            }
            parts[i] = group
                .parse()
                .map_err(|_| VersionError::BadGroup((*group).to_owned()))?;
        }
        Ok(Self {
            parts,
            groups: groups.len(),
        })
    }
}

impl TryFrom<String> for SuiteVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SuiteVersion> for String {
    fn from(v: SuiteVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for SuiteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.parts[..self.groups];
        for (i, part) in shown.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl PartialEq for SuiteVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for SuiteVersion {}

impl Hash for SuiteVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for SuiteVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SuiteVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_missing_groups_default_to_zero() {
        let a: SuiteVersion = "1.4".parse().unwrap();
        let b: SuiteVersion = "1.4.0".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn version_display_keeps_group_count() {
        let v: SuiteVersion = "2.1".parse().unwrap();
        assert_eq!(v.to_string(), "2.1");
    }

    #[test]
    fn suite_name_trims_and_rejects_controls() {
        assert_eq!(SuiteName::new("  Chess  ").unwrap().as_str(), "Chess");
        assert_eq!(SuiteName::new("a\u{7}b"), Err(ValidationError::ControlCharacter));
        assert_eq!(SuiteName::new("   "), Err(ValidationError::Empty));
    }
}
