//! Trusted-certificate store.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, warn};

use crate::cert::{parse_certificate, Certificate};
use crate::error::StoreError;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Source of trusted issuer certificates, keyed by exact subject name.
pub trait TrustStore: Send + Sync {
    /// All stored certificates whose subject equals `subject`.
    fn certificates_for(&self, subject: &str) -> Vec<&Certificate>;
}

/// An in-memory [`TrustStore`].
#[derive(Debug, Default)]
pub struct InMemoryTrustStore {
    by_subject: HashMap<String, Vec<Certificate>>,
}

impl InMemoryTrustStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trusted certificate.
    pub fn add(&mut self, cert: Certificate) {
        self.by_subject
            .entry(cert.subject().to_owned())
            .or_default()
            .push(cert);
    }

    /// Number of stored certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_subject.values().map(Vec::len).sum()
    }

    /// Whether the store holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

impl TrustStore for InMemoryTrustStore {
    fn certificates_for(&self, subject: &str) -> Vec<&Certificate> {
        self.by_subject
            .get(subject)
            .map_or_else(Vec::new, |certs| certs.iter().collect())
    }
}

/// Extract every DER certificate from PEM text.
///
/// # Errors
///
/// Returns [`StoreError::Pem`] if a block body is not valid base64.
pub fn decode_pem_certificates(text: &str) -> Result<Vec<Vec<u8>>, StoreError> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(begin) = rest.find(PEM_BEGIN) {
        let body_start = begin + PEM_BEGIN.len();
        let Some(end) = rest[body_start..].find(PEM_END) else {
            break;
        };
        let body: String = rest[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        out.push(STANDARD.decode(body)?);
        rest = &rest[body_start + end + PEM_END.len()..];
    }
    Ok(out)
}

/// Load every PEM or DER certificate file in `dir` into a new store.
///
/// Files that fail to parse are skipped with a warning; an unreadable
/// directory is an error.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the directory cannot be enumerated.
pub fn load_dir(dir: &Path) -> Result<InMemoryTrustStore, StoreError> {
    let mut store = InMemoryTrustStore::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match load_file(&path) {
            Ok(certs) => {
                for cert in certs {
                    debug!("trusting '{}' from {}", cert.subject(), path.display());
                    store.add(cert);
                }
            }
            Err(err) => warn!("skipping {}: {err}", path.display()),
        }
    }
    Ok(store)
}

fn load_file(path: &Path) -> Result<Vec<Certificate>, StoreError> {
    let raw = std::fs::read(path)?;
    let ders = match std::str::from_utf8(&raw) {
        Ok(text) if text.contains(PEM_BEGIN) => decode_pem_certificates(text)?,
        _ => vec![raw],
    };
    let mut certs = Vec::new();
    for der in ders {
        certs.push(parse_certificate(&der, 0, der.len())?);
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_blocks_are_extracted() {
        let text = format!("{PEM_BEGIN}\nAQID\n{PEM_END}\n{PEM_BEGIN}\nBAUG\n{PEM_END}\n");
        let ders = decode_pem_certificates(&text).unwrap();
        assert_eq!(ders, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn bad_base64_is_an_error() {
        let text = format!("{PEM_BEGIN}\n!!!\n{PEM_END}\n");
        assert!(decode_pem_certificates(&text).is_err());
    }
}
