//! Error types for certificate parsing and chain verification.

use thiserror::Error;

/// Errors raised while decoding raw DER structure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DerError {
    /// The input ended inside a tag, length, or value.
    #[error("unexpected end of DER input")]
    Truncated,
    /// A different tag was required at this position.
    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag {
        /// Required tag byte.
        expected: u8,
        /// Tag byte actually present.
        found: u8,
    },
    /// Indefinite or oversized length encoding.
    #[error("unsupported or malformed length encoding")]
    BadLength,
    /// A primitive value was structurally invalid.
    #[error("malformed {0} value")]
    Malformed(&'static str),
}

/// Errors raised while building a [`crate::cert::Certificate`].
///
/// Every variant denotes a corrupt certificate: the input cannot be used
/// for verification at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CertError {
    /// The byte range does not lie within the supplied buffer.
    #[error("certificate range out of bounds")]
    OutOfRange,
    /// The DER structure is damaged.
    #[error("corrupt certificate: {0}")]
    Der(#[from] DerError),
    /// The DER decoded but violates the certificate grammar.
    #[error("corrupt certificate: {0}")]
    Invalid(&'static str),
}

/// Errors raised while loading certificates into a trust store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred reading a certificate file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A PEM body was not valid base64.
    #[error("invalid PEM body: {0}")]
    Pem(#[from] base64::DecodeError),
    /// A certificate failed to parse.
    #[error(transparent)]
    Cert(#[from] CertError),
}

/// Typed chain verification failures.
///
/// Deliberately more granular than a generic error: the caller must be able
/// to tell a stale device trust store from a merely-expired leaf, a broken
/// chain from a usage-constraint violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrustError {
    /// No trust anchor signs the top of the presented chain.
    #[error("unrecognized certificate issuer '{0}'")]
    UnrecognizedIssuer(String),
    /// A signature did not verify against the issuer public key.
    #[error("signature verification failed for '{0}'")]
    VerificationFailed(String),
    /// Consecutive certificates do not link subject to issuer.
    #[error("broken certificate chain at '{0}'")]
    BrokenChain(String),
    /// A CA's path-length budget is exhausted by this chain.
    #[error("certificate chain too long at '{0}'")]
    ChainTooLong(String),
    /// A chain link is not authorized to act as a CA.
    #[error("'{0}' is not an authorized intermediate CA")]
    UnauthorizedIntermediate(String),
    /// A certificate lacks a required key usage.
    #[error("inappropriate key usage for '{0}'")]
    InappropriateKeyUsage(String),
    /// A certificate carries an unrecognized critical extension.
    #[error("unrecognized critical extension in '{0}'")]
    BadExtensions(String),
    /// A chain certificate's validity window has passed.
    #[error("certificate '{0}' has expired")]
    Expired(String),
    /// A chain certificate's validity window has not started.
    #[error("certificate '{0}' is not yet valid")]
    NotYetValid(String),
    /// The trust anchor itself has expired: the device store is stale.
    #[error("trusted root certificate '{0}' has expired")]
    RootCaExpired(String),
    /// A certificate carries no signature bits.
    #[error("certificate '{0}' has no signature")]
    MissingSignature(String),
    /// The signature algorithm's digest is not supported.
    #[error("unsupported signature algorithm on '{0}'")]
    UnsupportedSigAlg(String),
}
