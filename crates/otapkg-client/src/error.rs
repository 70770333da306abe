//! Error types for resource transfers.

use thiserror::Error;

/// Typed transfer failures, mapped from transport-level response codes.
///
/// "Could not reach the server" and "the server responded but rejected the
/// resource" are deliberately distinct conditions.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server could not be reached, or stayed unavailable through the
    /// retry-after window.
    #[error("could not reach server for {0}")]
    ServerNotFound(String),
    /// The server answered but the resource does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// The response media type is not acceptable for this resource.
    #[error("unacceptable media type '{media_type}' for {url}")]
    InvalidMediaType {
        /// Requested URL.
        url: String,
        /// Media type the server declared (empty when absent).
        media_type: String,
    },
    /// The server demands credentials.
    #[error("authentication required for {0}")]
    Unauthorized(String),
    /// The proxy demands credentials.
    #[error("proxy authentication required for {0}")]
    ProxyAuthRequired(String),
    /// The transfer was cancelled, or a redirect was declined.
    #[error("transfer cancelled")]
    Cancelled,
    /// More than one redirect in a single request.
    #[error("refusing a second redirect at {0}")]
    TooManyRedirects(String),
    /// Any other transport-level failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
