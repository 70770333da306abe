//! Certificate chain verification against a trust store.

use chrono::{DateTime, Utc};
use log::debug;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};

use crate::cert::{Certificate, DigestKind, PathLen, RsaKey};
use crate::error::TrustError;
use crate::store::TrustStore;

/// `KeyUsage`: `digitalSignature`.
pub const KU_DIGITAL_SIGNATURE: u32 = 1;
/// `KeyUsage`: `nonRepudiation`.
pub const KU_NON_REPUDIATION: u32 = 1 << 1;
/// `KeyUsage`: `keyEncipherment`.
pub const KU_KEY_ENCIPHERMENT: u32 = 1 << 2;
/// `KeyUsage`: `dataEncipherment`.
pub const KU_DATA_ENCIPHERMENT: u32 = 1 << 3;
/// `KeyUsage`: `keyAgreement`.
pub const KU_KEY_AGREEMENT: u32 = 1 << 4;
/// `KeyUsage`: `keyCertSign`. Required of every chain link acting as a CA.
pub const KU_CERT_SIGN: u32 = 1 << 5;
/// `KeyUsage`: `cRLSign`.
pub const KU_CRL_SIGN: u32 = 1 << 6;
/// No key-usage requirement.
pub const KU_NONE: u32 = 0;

/// `ExtendedKeyUsage`: `serverAuth`.
pub const EKU_SERVER_AUTH: u32 = 1 << 1;
/// `ExtendedKeyUsage`: `clientAuth`.
pub const EKU_CLIENT_AUTH: u32 = 1 << 2;
/// `ExtendedKeyUsage`: `codeSigning`. Required of package-signing leaves.
pub const EKU_CODE_SIGNING: u32 = 1 << 3;
/// No extended-key-usage requirement.
pub const EKU_NONE: u32 = 0;

/// PKCS#1 `DigestInfo` prefix for MD2.
pub const DIGEST_INFO_MD2: &[u8] = &[
    0x30, 0x20, 0x30, 0x0C, 0x06, 0x08, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x02, 0x02, 0x05,
    0x00, 0x04, 0x10,
];
/// PKCS#1 `DigestInfo` prefix for MD5.
pub const DIGEST_INFO_MD5: &[u8] = &[
    0x30, 0x20, 0x30, 0x0C, 0x06, 0x08, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x02, 0x05, 0x05,
    0x00, 0x04, 0x10,
];
/// PKCS#1 `DigestInfo` prefix for SHA-1.
pub const DIGEST_INFO_SHA1: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02, 0x1A, 0x05, 0x00, 0x04, 0x14,
];

fn digest_info_prefix(kind: DigestKind) -> &'static [u8] {
    match kind {
        DigestKind::Md5 => DIGEST_INFO_MD5,
        DigestKind::Sha1 => DIGEST_INFO_SHA1,
    }
}

/// The verifier's successful output: subject names ordered from the trust
/// anchor down to the leaf's direct issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationPath {
    /// Subject names, most-trusted first.
    pub names: Vec<String>,
}

impl std::fmt::Display for AuthorizationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names.join(" -> "))
    }
}

/// Verify an RSA PKCS#1 v1.5 signature over `hash` with the given raw key.
///
/// # Errors
///
/// Returns `Err(())` when the key material is unusable or the signature
/// does not match.
fn rsa_verify(key: &RsaKey, kind: DigestKind, hash: &[u8], signature: &[u8]) -> Result<(), ()> {
    let public = RsaPublicKey::new(
        BigUint::from_bytes_be(&key.modulus),
        BigUint::from_bytes_be(&key.exponent),
    )
    .map_err(|_| ())?;
    let scheme = Pkcs1v15Sign {
        hash_len: Some(hash.len()),
        prefix: digest_info_prefix(kind).into(),
    };
    public.verify(scheme, hash, signature).map_err(|_| ())
}

fn check_extensions(cert: &Certificate) -> Result<(), TrustError> {
    if cert.has_unrecognized_critical_extension() {
        return Err(TrustError::BadExtensions(cert.subject().to_owned()));
    }
    Ok(())
}

fn check_validity(cert: &Certificate, now: DateTime<Utc>) -> Result<(), TrustError> {
    if now < cert.not_before() {
        return Err(TrustError::NotYetValid(cert.subject().to_owned()));
    }
    if now > cert.not_after() {
        return Err(TrustError::Expired(cert.subject().to_owned()));
    }
    Ok(())
}

/// Check a certificate's usage constraints and validity window.
///
/// Used on the leaf with the caller-supplied requirements; also rejects
/// certificates carrying unrecognized critical extensions.
///
/// # Errors
///
/// Returns the matching [`TrustError`] on any violation.
pub fn check_key_usage_and_validity(
    cert: &Certificate,
    required_key_usage: u32,
    required_ext_key_usage: u32,
    now: DateTime<Utc>,
) -> Result<(), TrustError> {
    check_extensions(cert)?;
    if required_key_usage != KU_NONE {
        if let Some(usage) = cert.key_usage() {
            if usage & required_key_usage != required_key_usage {
                return Err(TrustError::InappropriateKeyUsage(cert.subject().to_owned()));
            }
        }
    }
    if required_ext_key_usage != EKU_NONE {
        if let Some(usage) = cert.ext_key_usage() {
            if usage & required_ext_key_usage != required_ext_key_usage {
                return Err(TrustError::InappropriateKeyUsage(cert.subject().to_owned()));
            }
        }
    }
    check_validity(cert, now)
}

/// Verify that `cert` was signed by the holder of `issuer_key`.
///
/// # Errors
///
/// Returns [`TrustError::UnsupportedSigAlg`] when the certificate's digest
/// could not be computed at parse time, [`TrustError::MissingSignature`]
/// when no signature bits are present, and
/// [`TrustError::VerificationFailed`] when the RSA comparison fails.
pub fn verify_signature(cert: &Certificate, issuer_key: &RsaKey) -> Result<(), TrustError> {
    let hash = cert
        .tbs_hash()
        .ok_or_else(|| TrustError::UnsupportedSigAlg(cert.subject().to_owned()))?;
    if cert.signature().is_empty() {
        return Err(TrustError::MissingSignature(cert.subject().to_owned()));
    }
    let kind = cert
        .signature_algorithm()
        .digest()
        .ok_or_else(|| TrustError::UnsupportedSigAlg(cert.subject().to_owned()))?;
    rsa_verify(issuer_key, kind, hash, cert.signature())
        .map_err(|()| TrustError::VerificationFailed(cert.subject().to_owned()))
}

/// Verify a detached RSA PKCS#1 v1.5 signature over already-hashed data
/// against a certificate's public key.
///
/// # Errors
///
/// Returns [`TrustError::VerificationFailed`] when the signer carries no
/// usable RSA key or the signature does not match.
pub fn verify_data_signature(
    signer: &Certificate,
    kind: DigestKind,
    hash: &[u8],
    signature: &[u8],
) -> Result<(), TrustError> {
    let key = signer
        .public_key()
        .ok_or_else(|| TrustError::VerificationFailed(signer.subject().to_owned()))?;
    rsa_verify(key, kind, hash, signature)
        .map_err(|()| TrustError::VerificationFailed(signer.subject().to_owned()))
}

fn anchor_signs(cert: &Certificate, anchor: &Certificate) -> bool {
    anchor
        .public_key()
        .is_some_and(|key| verify_signature(cert, key).is_ok())
}

fn check_anchor_validity(anchor: &Certificate, now: DateTime<Utc>) -> Result<(), TrustError> {
    match check_validity(anchor, now) {
        // an expired anchor means the device trust store is stale, which
        // callers must be able to tell apart from a bad presented chain
        Err(TrustError::Expired(subject)) => Err(TrustError::RootCaExpired(subject)),
        other => other,
    }
}

/// Verify an ordered certificate chain (leaf first) against a trust store.
///
/// The leaf must satisfy `required_key_usage`/`required_ext_key_usage` and
/// its validity window. Each further link must name the previous
/// certificate's issuer as its subject, be an authorized CA within its
/// path-length budget, and actually sign the previous certificate. The
/// search ends at the first trust-store candidate whose key verifies the
/// top of the walked chain.
///
/// # Errors
///
/// Returns a typed [`TrustError`] describing the first violation.
pub fn verify_chain(
    certs: &[Certificate],
    required_key_usage: u32,
    required_ext_key_usage: u32,
    store: &dyn TrustStore,
    now: DateTime<Utc>,
) -> Result<AuthorizationPath, TrustError> {
    let Some(leaf) = certs.first() else {
        return Err(TrustError::BrokenChain("<empty chain>".to_owned()));
    };
    check_key_usage_and_validity(leaf, required_key_usage, required_ext_key_usage, now)?;

    let mut names: Vec<String> = Vec::new();
    let mut max_path_seen: Option<u32> = None;
    let mut index = 0;

    loop {
        let cert = &certs[index];

        // The first trust-store candidate that verifies terminates the
        // search successfully.
        for anchor in store.certificates_for(cert.issuer()) {
            if anchor_signs(cert, anchor) {
                check_anchor_validity(anchor, now)?;
                debug!(
                    "chain for '{}' anchored at '{}'",
                    leaf.subject(),
                    anchor.subject()
                );
                names.push(anchor.subject().to_owned());
                names.reverse();
                return Ok(AuthorizationPath { names });
            }
        }

        // No anchor: the next certificate in the supplied chain must act
        // as the signing CA.
        let Some(next) = certs.get(index + 1) else {
            return Err(TrustError::UnrecognizedIssuer(cert.issuer().to_owned()));
        };
        if next.subject() != cert.issuer() {
            return Err(TrustError::BrokenChain(cert.subject().to_owned()));
        }
        check_extensions(next)?;
        if let Some(usage) = next.key_usage() {
            if usage & KU_CERT_SIGN == 0 {
                return Err(TrustError::InappropriateKeyUsage(next.subject().to_owned()));
            }
        }
        check_validity(next, now)?;

        let constraints = next.basic_constraints();
        if !constraints.is_ca || constraints.path_len == PathLen::Missing {
            return Err(TrustError::UnauthorizedIntermediate(
                next.subject().to_owned(),
            ));
        }
        if let PathLen::Length(limit) = constraints.path_len {
            if let Some(seen) = max_path_seen {
                // A declared budget at or below the running maximum is only
                // legitimate for a redundant self-signed trailing root.
                if limit <= seen && !next.is_self_signed() {
                    return Err(TrustError::ChainTooLong(next.subject().to_owned()));
                }
            }
            max_path_seen = Some(max_path_seen.map_or(limit, |seen| seen.max(limit)));
        }

        let issuer_key = next
            .public_key()
            .ok_or_else(|| TrustError::VerificationFailed(cert.subject().to_owned()))?;
        verify_signature(cert, issuer_key)?;

        names.push(next.subject().to_owned());
        index += 1;
    }
}
