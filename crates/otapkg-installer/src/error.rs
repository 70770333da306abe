//! The fatal failure taxonomy of an installation.

use thiserror::Error;

use otapkg_client::error::TransferError;
use otapkg_notify::status::StatusCode;
use otapkg_x509::error::{CertError, TrustError};

/// Errors raised by the package store collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O failure underneath the store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted record is unreadable.
    #[error("corrupt store record: {0}")]
    Corrupt(#[from] serde_json::Error),
    /// The requested suite is not in the store.
    #[error("suite '{0}' is not installed")]
    NotFound(String),
}

/// A fatal installation failure. Every variant aborts the protocol with
/// full rollback and maps onto one numbered provider status.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The descriptor is missing, malformed, or incomplete.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    /// The archive is malformed or does not contain what it must.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    /// A URL in the request or descriptor is unusable.
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    /// Descriptor and manifest disagree on a checked attribute.
    #[error("descriptor and manifest disagree on '{key}'")]
    AttributeMismatch {
        /// The property key that differs.
        key: String,
    },
    /// The downloaded archive size differs from the declared size.
    #[error("archive is {actual} bytes, descriptor declares {declared}")]
    SizeMismatch {
        /// Declared byte size.
        declared: u64,
        /// Received byte size.
        actual: u64,
    },
    /// The storage quota cannot hold the suite.
    #[error("insufficient storage: need {needed} bytes, {available} available")]
    InsufficientStorage {
        /// Estimated bytes needed.
        needed: u64,
        /// Bytes available.
        available: u64,
    },
    /// The user declined, no listener was attached to decide, or a
    /// cancellation request was observed at a safe point.
    #[error("installation cancelled")]
    Cancelled,
    /// A transfer failed after its own retry policy was exhausted.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// The signature chain could not be authenticated.
    #[error("authentication failed: {0}")]
    Authentication(#[from] TrustError),
    /// A signing certificate in the descriptor is corrupt.
    #[error("corrupt signing certificate: {0}")]
    Certificate(#[from] CertError),
    /// A required permission is denied by the assigned domain.
    #[error("required permission '{0}' denied by the security domain")]
    Authorization(String),
    /// A trusted suite may never be silently replaced by an untrusted one.
    #[error("refusing to replace a trusted suite with an untrusted one")]
    TrustedOverwrite,
    /// A push connection could not be registered.
    #[error("push registration failed for '{0}'")]
    PushRegistration(String),
    /// The package store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl InstallError {
    /// The numbered provider status reported for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDescriptor(_) => StatusCode::InvalidDescriptor,
            Self::InvalidArchive(_) => StatusCode::InvalidArchive,
            Self::InvalidUrl(_) => StatusCode::InvalidUrl,
            Self::AttributeMismatch { .. } => StatusCode::AttributeMismatch,
            Self::SizeMismatch { .. } => StatusCode::SizeMismatch,
            Self::InsufficientStorage { .. } | Self::Storage(_) => StatusCode::InsufficientStorage,
            Self::Cancelled => StatusCode::UserCancelled,
            Self::Transfer(TransferError::Cancelled) => StatusCode::UserCancelled,
            Self::Transfer(_) => StatusCode::LossOfService,
            Self::Authentication(_) | Self::Certificate(_) => StatusCode::AuthenticationFailure,
            Self::Authorization(_) | Self::TrustedOverwrite => StatusCode::AuthorizationFailure,
            Self::PushRegistration(_) => StatusCode::PushRegistrationFailure,
        }
    }
}
