//! Archive manifest parser: descriptor value grammar plus RFC822-style
//! line continuation, with a stricter key charset.

use thiserror::Error;

use crate::properties::PropertySet;

/// Error returned when a manifest cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// A non-blank line has no `:` separator.
    #[error("line {0}: missing ':' separator")]
    MissingSeparator(usize),
    /// A key is empty, starts with `-`/`_`, or contains a character outside
    /// alphanumerics plus `-`/`_`.
    #[error("line {0}: invalid manifest key")]
    InvalidKey(usize),
    /// A value contains a control character other than horizontal tab.
    #[error("line {0}: control character in manifest value")]
    InvalidValue(usize),
    /// The first line is a continuation with nothing to continue.
    #[error("line {0}: continuation line without a preceding property")]
    DanglingContinuation(usize),
}

fn valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn valid_value(value: &str) -> bool {
    !value.chars().any(|c| c.is_control() && c != '\t')
}

/// Parse manifest text into a [`PropertySet`].
///
/// A line beginning with a space continues the previous property value: the
/// single leading space is stripped and the remainder appended unaltered.
///
/// # Errors
///
/// Returns [`ManifestError`] on the first malformed line.
pub fn parse_manifest(text: &str) -> Result<PropertySet, ManifestError> {
    let mut props = PropertySet::new();
    // (key, value, line the property started on)
    let mut pending: Option<(String, String, usize)> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let lineno = idx + 1;

        if let Some(rest) = raw_line.strip_prefix(' ') {
            let Some(pend) = pending.as_mut() else {
                return Err(ManifestError::DanglingContinuation(lineno));
            };
            pend.1.push_str(rest);
            continue;
        }

        if let Some((key, value, start)) = pending.take() {
            let value = value.trim().to_owned();
            if !valid_value(&value) {
                return Err(ManifestError::InvalidValue(start));
            }
            props.insert(key, value);
        }

        if raw_line.trim().is_empty() {
            continue;
        }

        let (key, value) = raw_line
            .split_once(':')
            .ok_or(ManifestError::MissingSeparator(lineno))?;
        let key = key.trim();
        if !valid_key(key) {
            return Err(ManifestError::InvalidKey(lineno));
        }
        pending = Some((key.to_owned(), value.to_owned(), lineno));
    }

    if let Some((key, value, start)) = pending {
        let value = value.trim().to_owned();
        if !valid_value(&value) {
            return Err(ManifestError::InvalidValue(start));
        }
        props.insert(key, value);
    }

    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_reassembles_without_alteration() {
        let props = parse_manifest("Suite-Description: a long\n  description text\n").unwrap();
        assert_eq!(props.get("Suite-Description"), Some("a long description text"));
    }

    #[test]
    fn leading_dash_key_rejected() {
        assert_eq!(
            parse_manifest("-Key: v\n"),
            Err(ManifestError::InvalidKey(1))
        );
    }

    #[test]
    fn dangling_continuation_rejected() {
        assert_eq!(
            parse_manifest(" orphan\n"),
            Err(ManifestError::DanglingContinuation(1))
        );
    }
}
