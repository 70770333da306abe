//! Line-oriented `key: value` descriptor parser.
//!
//! The descriptor is the small file a provider publishes ahead of the full
//! archive: one property per line, blank lines permitted as group
//! separators. Keys follow the RFC token grammar (no control or separator
//! characters); values are trimmed and may contain any printable text plus
//! horizontal tabs.

use thiserror::Error;

use crate::properties::PropertySet;

/// RFC separator characters disallowed in descriptor keys.
const KEY_SEPARATORS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ',
];

/// Error returned when a descriptor cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// A non-blank line has no `:` separator.
    #[error("line {0}: missing ':' separator")]
    MissingSeparator(usize),
    /// A key is empty or contains a disallowed character.
    #[error("line {0}: invalid property key")]
    InvalidKey(usize),
    /// A value contains a control character other than horizontal tab.
    #[error("line {0}: control character in property value")]
    InvalidValue(usize),
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_control() || KEY_SEPARATORS.contains(&c))
}

fn valid_value(value: &str) -> bool {
    !value.chars().any(|c| c.is_control() && c != '\t')
}

/// Parse descriptor text into a [`PropertySet`]. Duplicate keys are
/// last-write-wins.
///
/// # Errors
///
/// Returns [`DescriptorError`] on the first malformed line.
pub fn parse_descriptor(text: &str) -> Result<PropertySet, DescriptorError> {
    let mut props = PropertySet::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;
        if raw_line.trim().is_empty() {
            continue;
        }
        let (key, value) = raw_line
            .split_once(':')
            .ok_or(DescriptorError::MissingSeparator(lineno))?;
        let key = key.trim();
        if !valid_key(key) {
            return Err(DescriptorError::InvalidKey(lineno));
        }
        let value = value.trim();
        if !valid_value(value) {
            return Err(DescriptorError::InvalidValue(lineno));
        }
        props.insert(key.to_owned(), value.to_owned());
    }

    Ok(props)
}
