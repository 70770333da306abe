//! The install state machine's step ladder and mutable state record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tempfile::NamedTempFile;

use otapkg_client::transfer::Credentials;
use otapkg_core::identity::PackageIdentity;
use otapkg_core::properties::PropertySet;
use otapkg_x509::verify::AuthorizationPath;

use crate::listener::Advisory;
use crate::request::InstallRequest;
use crate::store::InstalledSuite;

/// The strictly sequential installation steps. No step is skipped or
/// repeated except by rerunning the current step after a recoverable
/// condition is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    /// 1: fetch and validate the descriptor, detect a previous version.
    DownloadDescriptor,
    /// 2: unsigned updates must come from the previous descriptor origin.
    CheckUpdateOrigin,
    /// 3: the declared sizes must fit the storage quota.
    CheckQuota,
    /// 4: the user confirms the archive download.
    ConfirmDownload,
    /// 5: fetch the archive, authenticate it, cross-check the manifest.
    FetchAndVerify,
    /// 6: archive-only variant of the origin check.
    CheckArchiveOrigin,
    /// 7: assign domain and permissions, register push, commit.
    GrantAndCommit,
    /// 8: post-commit optimization; failures are swallowed.
    Optimize,
    /// 9: terminal marker consumed by the driving loop.
    Done,
}

impl InstallStep {
    /// Step number as presented to listeners, 1 through 9.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::DownloadDescriptor => 1,
            Self::CheckUpdateOrigin => 2,
            Self::CheckQuota => 3,
            Self::ConfirmDownload => 4,
            Self::FetchAndVerify => 5,
            Self::CheckArchiveOrigin => 6,
            Self::GrantAndCommit => 7,
            Self::Optimize => 8,
            Self::Done => 9,
        }
    }

    /// The step after this one.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::DownloadDescriptor => Self::CheckUpdateOrigin,
            Self::CheckUpdateOrigin => Self::CheckQuota,
            Self::CheckQuota => Self::ConfirmDownload,
            Self::ConfirmDownload => Self::FetchAndVerify,
            Self::FetchAndVerify => Self::CheckArchiveOrigin,
            Self::CheckArchiveOrigin => Self::GrantAndCommit,
            Self::GrantAndCommit => Self::Optimize,
            Self::Optimize | Self::Done => Self::Done,
        }
    }
}

/// The single mutable record threading through every step. Exclusively
/// owned by one in-flight installation.
pub struct InstallState {
    /// The immutable request that started this installation.
    pub request: InstallRequest,
    /// Current step.
    pub step: InstallStep,
    /// Parsed descriptor properties, absent for archive-only installs.
    pub descriptor: Option<PropertySet>,
    /// Parsed manifest properties once the archive has been read.
    pub manifest: Option<PropertySet>,
    /// Byte length of the raw descriptor; the bytes themselves are dropped
    /// as soon as they are parsed to bound memory.
    pub descriptor_len: u64,
    /// The single outstanding recoverable condition. A new one replaces
    /// it; the driver clears it at the start of every step.
    pub pending_advisory: Option<Advisory>,
    /// Server credentials supplied through the listener.
    pub credentials: Option<Credentials>,
    /// Proxy credentials supplied through the listener.
    pub proxy_credentials: Option<Credentials>,
    /// Snapshot of the previously installed version, when updating.
    pub previous: Option<InstalledSuite>,
    /// Assigned identity, set during commit preparation.
    pub identity: Option<PackageIdentity>,
    /// Whether the archive authenticated against the trust store.
    pub trusted: bool,
    /// Authorization path produced by chain verification.
    pub auth_path: Option<AuthorizationPath>,
    /// Hex serial of the leaf signing certificate.
    pub signer_serial: Option<String>,
    /// Temporary file holding the downloaded archive. Dropping it deletes
    /// the file, so failure cleanup is automatic.
    pub archive: Option<NamedTempFile>,
    /// Size of the downloaded archive in bytes.
    pub archive_len: u64,
    cancel: Arc<AtomicBool>,
    no_cancel: bool,
    started: Instant,
}

impl InstallState {
    /// Fresh state for `request`, observing `cancel` at safe points.
    #[must_use]
    pub fn new(request: InstallRequest, cancel: Arc<AtomicBool>) -> Self {
        Self {
            request,
            step: InstallStep::DownloadDescriptor,
            descriptor: None,
            manifest: None,
            descriptor_len: 0,
            pending_advisory: None,
            credentials: None,
            proxy_credentials: None,
            previous: None,
            identity: None,
            trusted: false,
            auth_path: None,
            signer_serial: None,
            archive: None,
            archive_len: 0,
            cancel,
            no_cancel: false,
            started: Instant::now(),
        }
    }

    /// Advance to the next step.
    pub fn advance(&mut self) {
        self.step = self.step.next();
    }

    /// The shared cancellation flag, for handing to transfers.
    #[must_use]
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    /// Whether a cancellation request should take effect now. Inside the
    /// point-of-no-return window requests stay recorded but are deferred
    /// to the next safe point.
    #[must_use]
    pub fn cancellation_due(&self) -> bool {
        !self.no_cancel && self.cancel.load(Ordering::SeqCst)
    }

    /// Enter the point-of-no-return window.
    pub fn begin_no_cancel(&mut self) {
        self.no_cancel = true;
    }

    /// Leave the point-of-no-return window; a deferred cancellation takes
    /// effect at the next safe point.
    pub fn end_no_cancel(&mut self) {
        self.no_cancel = false;
    }

    /// Seconds elapsed since this installation started.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Merged view of manifest properties with descriptor values taking
    /// precedence.
    #[must_use]
    pub fn merged_properties(&self) -> PropertySet {
        let mut merged = PropertySet::new();
        if let Some(manifest) = &self.manifest {
            for (key, value) in manifest.entries() {
                merged.insert(key.to_owned(), value.to_owned());
            }
        }
        if let Some(descriptor) = &self.descriptor {
            for (key, value) in descriptor.entries() {
                merged.insert(key.to_owned(), value.to_owned());
            }
        }
        merged
    }
}

/// A cloneable handle for requesting cancellation from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// A fresh, unset handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cancellation request. Cooperative: the installer acts on
    /// it at its next safe point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The shared flag itself.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InstallSource;

    #[test]
    fn steps_advance_in_order_and_stop_at_done() {
        let mut step = InstallStep::DownloadDescriptor;
        let mut numbers = vec![step.number()];
        while step != InstallStep::Done {
            step = step.next();
            numbers.push(step.number());
        }
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(InstallStep::Done.next(), InstallStep::Done);
    }

    #[test]
    fn no_cancel_window_defers_cancellation() {
        let handle = CancelHandle::new();
        let request = InstallRequest::new(InstallSource::Archive("http://x/a.pkg".into()));
        let mut state = InstallState::new(request, handle.flag());

        state.begin_no_cancel();
        handle.cancel();
        assert!(!state.cancellation_due(), "deferred inside the window");

        state.end_no_cancel();
        assert!(state.cancellation_due(), "takes effect at the next safe point");
    }
}
