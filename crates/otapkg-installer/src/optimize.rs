//! Optional post-commit optimization seam.
//!
//! Injected rather than discovered: deployments without an optimizer get
//! the no-op default, and a failing optimizer never rolls back the
//! already-committed install.

use std::path::Path;

use thiserror::Error;

use crate::store::InstalledSuite;

/// A failed optimization attempt. Logged and swallowed by the installer.
#[derive(Debug, Error)]
#[error("optimization failed: {0}")]
pub struct OptimizeError(pub String);

/// Post-commit work such as ahead-of-time image generation or one-time
/// bytecode verification.
pub trait PostInstallOptimizer: Send + Sync {
    /// Optimize the committed suite.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizeError`] on failure; the installer logs it and
    /// moves on.
    fn optimize(&self, suite: &InstalledSuite, archive: &Path) -> Result<(), OptimizeError>;
}

/// The default optimizer: does nothing.
#[derive(Debug, Default)]
pub struct NoopOptimizer;

impl PostInstallOptimizer for NoopOptimizer {
    fn optimize(&self, _suite: &InstalledSuite, _archive: &Path) -> Result<(), OptimizeError> {
        Ok(())
    }
}
