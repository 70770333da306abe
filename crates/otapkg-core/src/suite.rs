//! Suite attribute schema: well-known property keys and the structured
//! attributes derived from them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::properties::{PropertyError, PropertySet};
use crate::types::{SuiteName, SuiteVersion, ValidationError, VendorName, VersionError};

/// Suite display name. Mandatory in descriptor and manifest.
pub const KEY_NAME: &str = "Suite-Name";
/// Vendor display name. Mandatory in descriptor and manifest.
pub const KEY_VENDOR: &str = "Suite-Vendor";
/// Dotted version. Mandatory in descriptor and manifest.
pub const KEY_VERSION: &str = "Suite-Version";
/// Absolute archive URL. Mandatory in the descriptor.
pub const KEY_ARCHIVE_URL: &str = "Suite-Archive-URL";
/// Declared archive size in bytes. Mandatory in the descriptor.
pub const KEY_ARCHIVE_SIZE: &str = "Suite-Archive-Size";
/// Declared persistent-data budget in bytes.
pub const KEY_DATA_SIZE: &str = "Suite-Data-Size";
/// Provider URL receiving install/delete status notifications.
pub const KEY_NOTIFY_URL: &str = "Suite-Notify-URL";
/// Human-readable description.
pub const KEY_DESCRIPTION: &str = "Suite-Description";
/// Comma-separated permissions the suite cannot run without.
pub const KEY_REQUIRED_PERMISSIONS: &str = "Suite-Required-Permissions";
/// Comma-separated permissions the suite can degrade without.
pub const KEY_OPTIONAL_PERMISSIONS: &str = "Suite-Optional-Permissions";
/// Base64 RSA-SHA1 signature over the archive bytes.
pub const KEY_ARCHIVE_SIGNATURE: &str = "Suite-Signature-RSA-SHA1";

/// Prefix of numbered entry-point attributes (`Entry-1`, `Entry-2`, ...).
pub const KEY_ENTRY_PREFIX: &str = "Entry-";
/// Prefix of numbered push-registration attributes (`Push-1`, ...).
pub const KEY_PUSH_PREFIX: &str = "Push-";

/// Attributes that must agree between descriptor and manifest whenever the
/// suite is installed into a trusted domain.
pub const TRUST_SENSITIVE_KEYS: &[&str] = &[
    KEY_NAME,
    KEY_VENDOR,
    KEY_VERSION,
    KEY_REQUIRED_PERMISSIONS,
    KEY_OPTIONAL_PERMISSIONS,
];

/// Build the key of the n-th certificate of a chain, 1-based on both axes.
#[must_use]
pub fn certificate_key(chain: usize, index: usize) -> String {
    format!("Suite-Certificate-{chain}-{index}")
}

/// Build the key of the n-th entry point, 1-based.
#[must_use]
pub fn entry_key(index: usize) -> String {
    format!("{KEY_ENTRY_PREFIX}{index}")
}

/// Build the key of the n-th push declaration, 1-based.
#[must_use]
pub fn push_key(index: usize) -> String {
    format!("{KEY_PUSH_PREFIX}{index}")
}

/// Error produced when structured attributes cannot be derived.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// A mandatory property is missing or numeric and malformed.
    #[error(transparent)]
    Property(#[from] PropertyError),
    /// A name/vendor value failed validation.
    #[error("invalid {key}: {source}")]
    BadName {
        /// Offending property key.
        key: String,
        /// Underlying validation failure.
        source: ValidationError,
    },
    /// The version value failed validation.
    #[error("invalid {KEY_VERSION}: {0}")]
    BadVersion(#[from] VersionError),
    /// A numbered attribute value does not have the expected field count.
    #[error("malformed attribute '{key}': expected {expected} comma-separated fields")]
    MalformedFields {
        /// Offending property key.
        key: String,
        /// Expected number of fields.
        expected: usize,
    },
}

/// An executable entry point declared by the suite: a display label plus the
/// archive-relative path that must exist inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Display label.
    pub label: String,
    /// Path of the referenced file inside the archive.
    pub path: String,
}

/// A push connection the suite wants registered at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDeclaration {
    /// Connection endpoint to listen on.
    pub endpoint: String,
    /// Entry-point label to launch on an inbound connection.
    pub entry: String,
    /// Allowed-sender filter.
    pub allowed_sender: String,
}

/// The validated identity triple shared by descriptor and manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteIdentity {
    /// Suite name.
    pub name: SuiteName,
    /// Vendor name.
    pub vendor: VendorName,
    /// Suite version.
    pub version: SuiteVersion,
}

/// Extract and validate the mandatory identity triple from a property set.
///
/// # Errors
///
/// Returns [`AttributeError`] if any of name, vendor, or version is missing
/// or malformed.
pub fn suite_identity(props: &PropertySet) -> Result<SuiteIdentity, AttributeError> {
    let name = SuiteName::new(props.require(KEY_NAME)?).map_err(|source| {
        AttributeError::BadName {
            key: KEY_NAME.to_owned(),
            source,
        }
    })?;
    let vendor = VendorName::new(props.require(KEY_VENDOR)?).map_err(|source| {
        AttributeError::BadName {
            key: KEY_VENDOR.to_owned(),
            source,
        }
    })?;
    let version: SuiteVersion = props.require(KEY_VERSION)?.parse()?;
    Ok(SuiteIdentity {
        name,
        vendor,
        version,
    })
}

fn numbered_values<'a>(props: &'a PropertySet, prefix: &str) -> Vec<(String, &'a str)> {
    let mut out = Vec::new();
    for index in 1.. {
        let key = format!("{prefix}{index}");
        let Some(value) = props.get(&key) else {
            break;
        };
        out.push((key, value));
    }
    out
}

/// Collect the contiguous `Entry-1..Entry-n` declarations.
///
/// # Errors
///
/// Returns [`AttributeError::MalformedFields`] if a value does not split
/// into a label and a path.
pub fn entry_points(props: &PropertySet) -> Result<Vec<EntryPoint>, AttributeError> {
    let mut entries = Vec::new();
    for (key, value) in numbered_values(props, KEY_ENTRY_PREFIX) {
        let Some((label, path)) = value.split_once(',') else {
            return Err(AttributeError::MalformedFields { key, expected: 2 });
        };
        entries.push(EntryPoint {
            label: label.trim().to_owned(),
            path: path.trim().to_owned(),
        });
    }
    Ok(entries)
}

/// Collect the contiguous `Push-1..Push-n` declarations.
///
/// # Errors
///
/// Returns [`AttributeError::MalformedFields`] if a value does not split
/// into endpoint, entry label, and allowed-sender filter.
pub fn push_declarations(props: &PropertySet) -> Result<Vec<PushDeclaration>, AttributeError> {
    let mut decls = Vec::new();
    for (key, value) in numbered_values(props, KEY_PUSH_PREFIX) {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(AttributeError::MalformedFields { key, expected: 3 });
        }
        decls.push(PushDeclaration {
            endpoint: fields[0].to_owned(),
            entry: fields[1].to_owned(),
            allowed_sender: fields[2].to_owned(),
        });
    }
    Ok(decls)
}

/// Split a comma-separated permission list value into trimmed names.
#[must_use]
pub fn permission_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
