//! The package store collaborator: durable suite records with atomic
//! identity assignment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use otapkg_core::identity::{PackageIdentity, StorageId};
use otapkg_core::properties::PropertySet;
use otapkg_core::suite::PushDeclaration;
use otapkg_core::types::{SuiteName, SuiteVersion, VendorName};

use crate::domain::PermissionGrant;
use crate::error::StorageError;

/// A durably installed suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledSuite {
    /// Assigned identity.
    pub identity: PackageIdentity,
    /// Security domain the suite was installed into.
    pub domain: String,
    /// Whether the suite authenticated at install time.
    pub trusted: bool,
    /// Descriptor URL the suite came from, when one was used.
    pub descriptor_url: Option<String>,
    /// Archive URL the payload was fetched from.
    pub archive_url: String,
    /// Merged descriptor/manifest properties.
    pub properties: PropertySet,
    /// Current permission grants.
    pub permissions: Vec<PermissionGrant>,
    /// Push connections registered for this suite.
    pub push: Vec<PushDeclaration>,
    /// Hex serial of the leaf signing certificate, for signer matching.
    pub signer_serial: Option<String>,
    /// Installed archive size in bytes.
    pub archive_size: u64,
    /// When the suite was committed.
    pub installed_at: DateTime<Utc>,
}

/// Durable storage for installed suites.
///
/// A store holds at most one suite per (name, vendor); identity assignment
/// is atomic, so concurrent installations can never share a storage slot.
pub trait PackageStore: Send + Sync {
    /// Bytes still available for new suites.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be inspected.
    fn available_space(&self) -> Result<u64, StorageError>;

    /// The installed suite with this (name, vendor), if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if records cannot be read.
    fn find(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
    ) -> Result<Option<InstalledSuite>, StorageError>;

    /// Assign an identity, exactly once per (name, vendor): an update
    /// reuses the previous storage slot, a fresh install gets a new one
    /// (honoring `hint` when that slot is free).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the assignment cannot be recorded.
    fn create_identity(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
        version: &SuiteVersion,
        hint: Option<StorageId>,
    ) -> Result<PackageIdentity, StorageError>;

    /// Durably commit a suite record and its archive.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the record or archive cannot be written.
    fn store(&self, suite: &InstalledSuite, archive: &Path) -> Result<(), StorageError>;

    /// Discard the persistent data kept for a suite's storage slot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    fn clear_data(&self, identity: &PackageIdentity) -> Result<(), StorageError>;

    /// Remove a suite, returning its final record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no such suite is installed.
    fn remove(&self, name: &SuiteName, vendor: &VendorName)
        -> Result<InstalledSuite, StorageError>;

    /// Every installed suite.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if records cannot be read.
    fn list(&self) -> Result<Vec<InstalledSuite>, StorageError>;
}

fn suite_key(name: &SuiteName, vendor: &VendorName) -> (String, String) {
    (name.as_str().to_owned(), vendor.as_str().to_owned())
}

#[derive(Debug, Default)]
struct MemoryInner {
    suites: HashMap<(String, String), InstalledSuite>,
    assigned: HashMap<(String, String), StorageId>,
    next_id: u32,
}

/// An in-memory [`PackageStore`] for tests and ephemeral use.
#[derive(Debug)]
pub struct InMemoryPackageStore {
    inner: Mutex<MemoryInner>,
    capacity: u64,
}

impl InMemoryPackageStore {
    /// A store reporting `capacity` available bytes.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PackageStore for InMemoryPackageStore {
    fn available_space(&self) -> Result<u64, StorageError> {
        let used: u64 = self.lock().suites.values().map(|s| s.archive_size).sum();
        Ok(self.capacity.saturating_sub(used))
    }

    fn find(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
    ) -> Result<Option<InstalledSuite>, StorageError> {
        Ok(self.lock().suites.get(&suite_key(name, vendor)).cloned())
    }

    fn create_identity(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
        version: &SuiteVersion,
        hint: Option<StorageId>,
    ) -> Result<PackageIdentity, StorageError> {
        let mut inner = self.lock();
        let key = suite_key(name, vendor);
        let taken: Vec<StorageId> = inner.assigned.values().copied().collect();
        let storage_id = if let Some(existing) = inner.assigned.get(&key) {
            *existing
        } else {
            let id = match hint {
                Some(id) if !taken.contains(&id) => id,
                _ => {
                    inner.next_id += 1;
                    StorageId(inner.next_id)
                }
            };
            inner.assigned.insert(key, id);
            id
        };
        Ok(PackageIdentity {
            name: name.clone(),
            vendor: vendor.clone(),
            version: version.clone(),
            storage_id,
        })
    }

    fn store(&self, suite: &InstalledSuite, _archive: &Path) -> Result<(), StorageError> {
        let key = suite_key(&suite.identity.name, &suite.identity.vendor);
        self.lock().suites.insert(key, suite.clone());
        Ok(())
    }

    fn clear_data(&self, identity: &PackageIdentity) -> Result<(), StorageError> {
        debug!("discarding data for {identity}");
        Ok(())
    }

    fn remove(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
    ) -> Result<InstalledSuite, StorageError> {
        let key = suite_key(name, vendor);
        let mut inner = self.lock();
        inner.assigned.remove(&key);
        inner
            .suites
            .remove(&key)
            .ok_or_else(|| StorageError::NotFound(format!("{vendor} {name}")))
    }

    fn list(&self) -> Result<Vec<InstalledSuite>, StorageError> {
        Ok(self.lock().suites.values().cloned().collect())
    }
}

/// A [`PackageStore`] keeping one JSON record plus the archive per suite
/// under a root directory.
#[derive(Debug)]
pub struct DirPackageStore {
    root: PathBuf,
    capacity: u64,
    lock: Mutex<()>,
}

impl DirPackageStore {
    /// Open (creating if needed) a store rooted at `root` with a fixed
    /// byte capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the root cannot be created.
    pub fn open(root: PathBuf, capacity: u64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            capacity,
            lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: StorageId) -> PathBuf {
        self.root.join(format!("{}.json", id.0))
    }

    fn archive_path(&self, id: StorageId) -> PathBuf {
        self.root.join(format!("{}.pkg", id.0))
    }

    fn data_path(&self, id: StorageId) -> PathBuf {
        self.root.join(format!("{}.data", id.0))
    }

    fn load_all(&self) -> Result<Vec<InstalledSuite>, StorageError> {
        let mut suites = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(std::ffi::OsStr::to_str) == Some("json") {
                let raw = std::fs::read_to_string(&path)?;
                suites.push(serde_json::from_str(&raw)?);
            }
        }
        Ok(suites)
    }
}

impl PackageStore for DirPackageStore {
    fn available_space(&self) -> Result<u64, StorageError> {
        let mut used = 0;
        for entry in std::fs::read_dir(&self.root)? {
            used += entry?.metadata()?.len();
        }
        Ok(self.capacity.saturating_sub(used))
    }

    fn find(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
    ) -> Result<Option<InstalledSuite>, StorageError> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|s| s.identity.same_suite(name, vendor)))
    }

    fn create_identity(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
        version: &SuiteVersion,
        hint: Option<StorageId>,
    ) -> Result<PackageIdentity, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.load_all()?;
        let storage_id = if let Some(prev) = existing.iter().find(|s| s.identity.same_suite(name, vendor)) {
            prev.identity.storage_id
        } else {
            let taken: Vec<StorageId> = existing.iter().map(|s| s.identity.storage_id).collect();
            match hint {
                Some(id) if !taken.contains(&id) => id,
                _ => StorageId(taken.iter().map(|id| id.0).max().unwrap_or(0) + 1),
            }
        };
        Ok(PackageIdentity {
            name: name.clone(),
            vendor: vendor.clone(),
            version: version.clone(),
            storage_id,
        })
    }

    fn store(&self, suite: &InstalledSuite, archive: &Path) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let id = suite.identity.storage_id;
        std::fs::copy(archive, self.archive_path(id))?;
        std::fs::write(self.record_path(id), serde_json::to_string_pretty(suite)?)?;
        info!("committed {} to slot {id}", suite.identity);
        Ok(())
    }

    fn clear_data(&self, identity: &PackageIdentity) -> Result<(), StorageError> {
        let data = self.data_path(identity.storage_id);
        if data.exists() {
            std::fs::remove_dir_all(&data)?;
            debug!("discarded data for {identity}");
        }
        Ok(())
    }

    fn remove(
        &self,
        name: &SuiteName,
        vendor: &VendorName,
    ) -> Result<InstalledSuite, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let suite = self
            .load_all()?
            .into_iter()
            .find(|s| s.identity.same_suite(name, vendor))
            .ok_or_else(|| StorageError::NotFound(format!("{vendor} {name}")))?;
        let id = suite.identity.storage_id;
        std::fs::remove_file(self.record_path(id))?;
        let archive = self.archive_path(id);
        if archive.exists() {
            std::fs::remove_file(&archive)?;
        }
        let data = self.data_path(id);
        if data.exists() {
            std::fs::remove_dir_all(&data)?;
        }
        info!("removed {}", suite.identity);
        Ok(suite)
    }

    fn list(&self) -> Result<Vec<InstalledSuite>, StorageError> {
        self.load_all()
    }
}
