//! Package identity: the unique (name, vendor, version, storage id) tuple.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{SuiteName, SuiteVersion, VendorName};

/// Storage slot identifier assigned by the package store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageId(pub u32);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The identity of a stored suite.
///
/// A store holds at most one suite per (name, vendor) pair; the storage id
/// is assigned exactly once when the identity is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Suite name.
    pub name: SuiteName,
    /// Vendor name.
    pub vendor: VendorName,
    /// Suite version.
    pub version: SuiteVersion,
    /// Storage slot assigned by the store.
    pub storage_id: StorageId,
}

impl PackageIdentity {
    /// Whether this identity denotes the same (name, vendor) pair.
    #[must_use]
    pub fn same_suite(&self, name: &SuiteName, vendor: &VendorName) -> bool {
        self.name == *name && self.vendor == *vendor
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.vendor, self.name, self.version, self.storage_id
        )
    }
}
