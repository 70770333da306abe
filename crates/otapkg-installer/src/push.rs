//! The push-registry collaborator: an opaque side-effecting service the
//! installer drives transactionally.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use otapkg_core::identity::PackageIdentity;
use otapkg_core::suite::PushDeclaration;

/// Errors from push-connection registration.
#[derive(Debug, Error)]
pub enum PushError {
    /// Another suite already listens on this endpoint.
    #[error("push endpoint '{0}' is already registered")]
    Conflict(String),
    /// The registry rejected the registration for another reason.
    #[error("push registration rejected: {0}")]
    Rejected(String),
}

/// Registers inbound-connection launch points for installed suites.
pub trait PushRegistry: Send + Sync {
    /// Register one declaration for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError`] if the endpoint cannot be registered.
    fn register(&self, owner: &PackageIdentity, decl: &PushDeclaration) -> Result<(), PushError>;

    /// Remove one registration owned by `owner`.
    fn unregister(&self, owner: &PackageIdentity, endpoint: &str);
}

/// A registry that accepts everything and remembers nothing.
#[derive(Debug, Default)]
pub struct NoopPushRegistry;

impl PushRegistry for NoopPushRegistry {
    fn register(&self, _owner: &PackageIdentity, _decl: &PushDeclaration) -> Result<(), PushError> {
        Ok(())
    }

    fn unregister(&self, _owner: &PackageIdentity, _endpoint: &str) {}
}

/// An in-memory registry enforcing endpoint uniqueness, for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryPushRegistry {
    // endpoint -> owning storage slot
    entries: Mutex<HashMap<String, u32>>,
}

impl InMemoryPushRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints currently registered.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PushRegistry for InMemoryPushRegistry {
    fn register(&self, owner: &PackageIdentity, decl: &PushDeclaration) -> Result<(), PushError> {
        let mut entries = self.lock();
        if let Some(holder) = entries.get(&decl.endpoint) {
            if *holder != owner.storage_id.0 {
                return Err(PushError::Conflict(decl.endpoint.clone()));
            }
        }
        entries.insert(decl.endpoint.clone(), owner.storage_id.0);
        Ok(())
    }

    fn unregister(&self, owner: &PackageIdentity, endpoint: &str) {
        let mut entries = self.lock();
        if entries.get(endpoint) == Some(&owner.storage_id.0) {
            entries.remove(endpoint);
        }
    }
}
