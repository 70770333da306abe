//! X.509 certificate parsing.
//!
//! A single forward pass over the DER buffer builds an immutable
//! [`Certificate`]. The digest of the to-be-signed region is computed
//! eagerly over the exact transmitted bytes; when the declared signature
//! algorithm's digest is unsupported the hash is left absent, which forces
//! any later verification to fail closed.

use chrono::{DateTime, TimeZone, Utc};
use md5::Md5;
use sha1::{Digest, Sha1};

use crate::der::{
    bit_string_bytes, integer_magnitude, oid_to_string, tag_context, tag_context_primitive,
    DerReader, Tlv, TAG_BIT_STRING, TAG_BOOLEAN, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID,
    TAG_SEQUENCE, TAG_SET, TAG_UTC_TIME,
};
use crate::error::{CertError, DerError};

const OID_PKCS1_PREFIX: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01];
const OID_DSA_PREFIX: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x38, 0x04];

const OID_EXT_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x0F];
const OID_EXT_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1D, 0x11];
const OID_EXT_BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1D, 0x13];
const OID_EXT_EXTENDED_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25];
const OID_EXT_AUTHORITY_INFO_ACCESS: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x01, 0x01];

const OID_ANY_EXTENDED_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25, 0x00];
const OID_KEY_PURPOSE_PREFIX: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03];

/// Attribute types rendered with a short label in distinguished names.
const NAME_ATTRIBUTES: &[(&[u8], &str)] = &[
    (&[0x55, 0x04, 0x03], "CN"),
    (&[0x55, 0x04, 0x06], "C"),
    (&[0x55, 0x04, 0x07], "L"),
    (&[0x55, 0x04, 0x08], "ST"),
    (&[0x55, 0x04, 0x09], "STREET"),
    (&[0x55, 0x04, 0x0A], "O"),
    (&[0x55, 0x04, 0x0B], "OU"),
    (
        &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x01],
        "EmailAddress",
    ),
];

/// Signature or subject-key algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// PKCS#1 `rsaEncryption` (key algorithm, not a signature scheme).
    RsaEncryption,
    /// MD2 with RSA. Recognized but the digest is unsupported.
    Md2WithRsa,
    /// MD4 with RSA. Recognized but the digest is unsupported.
    Md4WithRsa,
    /// MD5 with RSA.
    Md5WithRsa,
    /// SHA-1 with RSA.
    Sha1WithRsa,
    /// A DSA-family identifier. Parsed for forward compatibility only.
    Dsa,
    /// Anything else.
    Unknown,
}

impl SignatureAlgorithm {
    fn from_oid(oid: &[u8]) -> Self {
        if let Some((&discriminator, prefix)) = oid.split_last() {
            if prefix == OID_PKCS1_PREFIX {
                return match discriminator {
                    1 => Self::RsaEncryption,
                    2 => Self::Md2WithRsa,
                    3 => Self::Md4WithRsa,
                    4 => Self::Md5WithRsa,
                    5 => Self::Sha1WithRsa,
                    _ => Self::Unknown,
                };
            }
            if prefix == OID_DSA_PREFIX {
                return Self::Dsa;
            }
        }
        Self::Unknown
    }

    /// The digest this scheme hashes with, when supported.
    #[must_use]
    pub fn digest(self) -> Option<DigestKind> {
        match self {
            Self::Md5WithRsa => Some(DigestKind::Md5),
            Self::Sha1WithRsa => Some(DigestKind::Sha1),
            _ => None,
        }
    }
}

/// A supported message digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// MD5 (16-byte output).
    Md5,
    /// SHA-1 (20-byte output).
    Sha1,
}

/// Hash `data` with the given digest.
#[must_use]
pub fn digest_bytes(kind: DigestKind, data: &[u8]) -> Vec<u8> {
    match kind {
        DigestKind::Md5 => Md5::digest(data).to_vec(),
        DigestKind::Sha1 => Sha1::digest(data).to_vec(),
    }
}

/// Raw RSA public key material: big-endian modulus and exponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKey {
    /// Modulus, big-endian, sign-padding stripped.
    pub modulus: Vec<u8>,
    /// Public exponent, big-endian.
    pub exponent: Vec<u8>,
}

/// Path-length constraint from `BasicConstraints`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLen {
    /// No constraint carried (non-CA, or v1/v2 certificate).
    Missing,
    /// CA with no declared limit.
    Unlimited,
    /// At most this many subordinate CAs below this certificate.
    Length(u32),
}

/// Decoded `BasicConstraints` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicConstraints {
    /// Whether the certificate may act as a CA.
    pub is_ca: bool,
    /// Path-length constraint.
    pub path_len: PathLen,
}

impl Default for BasicConstraints {
    fn default() -> Self {
        Self {
            is_ca: false,
            path_len: PathLen::Missing,
        }
    }
}

/// A subject-alternative-name or access-location entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneralName {
    /// An `rfc822Name` (email address).
    Rfc822Name(String),
    /// A `dNSName`.
    DnsName(String),
    /// A `uniformResourceIdentifier`.
    Uri(String),
    /// Any other name type, retained raw.
    Other {
        /// Context tag number.
        tag: u8,
        /// Undecoded content.
        data: Vec<u8>,
    },
}

/// One `AuthorityInfoAccess` entry with a decodable location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDescription {
    /// Access method OID in dotted-decimal form.
    pub method: String,
    /// Access location.
    pub location: GeneralName,
}

#[derive(Debug, Default)]
struct ExtensionSummary {
    key_usage: Option<u32>,
    ext_key_usage: Option<u32>,
    basic_constraints: BasicConstraints,
    subject_alt_names: Vec<GeneralName>,
    authority_info_access: Vec<AccessDescription>,
    unrecognized_critical: bool,
}

/// An immutable parsed X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    subject: String,
    issuer: String,
    serial: Vec<u8>,
    serial_hex: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: Option<RsaKey>,
    signature_algorithm: SignatureAlgorithm,
    signature: Vec<u8>,
    tbs_hash: Option<Vec<u8>>,
    self_signed: bool,
    key_usage: Option<u32>,
    ext_key_usage: Option<u32>,
    basic_constraints: BasicConstraints,
    subject_alt_names: Vec<GeneralName>,
    authority_info_access: Vec<AccessDescription>,
    unrecognized_critical: bool,
}

impl Certificate {
    /// Rendered subject name, e.g. `CN=Acme Root;O=Acme;C=US`.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Rendered issuer name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number content bytes as transmitted.
    #[must_use]
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as lowercase hex.
    #[must_use]
    pub fn serial_hex(&self) -> &str {
        &self.serial_hex
    }

    /// Start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// RSA public key, absent for non-RSA subject keys.
    #[must_use]
    pub fn public_key(&self) -> Option<&RsaKey> {
        self.public_key.as_ref()
    }

    /// Declared signature algorithm.
    #[must_use]
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Raw signature bytes (bit string, padded to whole bytes).
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Digest of the to-be-signed region, absent when the declared
    /// algorithm's digest is unsupported.
    #[must_use]
    pub fn tbs_hash(&self) -> Option<&[u8]> {
        self.tbs_hash.as_deref()
    }

    /// Whether subject and issuer names are identical.
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    /// `KeyUsage` bitmask (bit 0 = `digitalSignature`), absent without the
    /// extension.
    #[must_use]
    pub fn key_usage(&self) -> Option<u32> {
        self.key_usage
    }

    /// `ExtendedKeyUsage` bitmask, absent without the extension or when the
    /// non-critical value carried an unrecognized purpose.
    #[must_use]
    pub fn ext_key_usage(&self) -> Option<u32> {
        self.ext_key_usage
    }

    /// `BasicConstraints` summary.
    #[must_use]
    pub fn basic_constraints(&self) -> BasicConstraints {
        self.basic_constraints
    }

    /// Subject alternative names.
    #[must_use]
    pub fn subject_alt_names(&self) -> &[GeneralName] {
        &self.subject_alt_names
    }

    /// `AuthorityInfoAccess` entries with decodable locations.
    #[must_use]
    pub fn authority_info_access(&self) -> &[AccessDescription] {
        &self.authority_info_access
    }

    /// Whether an unrecognized critical extension was present.
    #[must_use]
    pub fn has_unrecognized_critical_extension(&self) -> bool {
        self.unrecognized_critical
    }
}

/// Parse one DER-encoded X.509 certificate from `buf[offset..offset + len]`.
///
/// # Errors
///
/// Returns [`CertError`] on any structural violation: length overruns, tag
/// mismatches, truncated sequences, or grammar violations such as an
/// extensions block on a pre-v3 certificate.
pub fn parse_certificate(buf: &[u8], offset: usize, len: usize) -> Result<Certificate, CertError> {
    let end = offset.checked_add(len).ok_or(CertError::OutOfRange)?;
    let slice = buf.get(offset..end).ok_or(CertError::OutOfRange)?;

    let mut top = DerReader::new(slice);
    let mut outer = top.sequence()?;
    if !top.at_end() {
        return Err(CertError::Invalid("trailing data after certificate"));
    }

    let tbs = outer.expect(TAG_SEQUENCE)?;
    let mut tbs_r = tbs.reader();

    let version = parse_version(&mut tbs_r)?;
    let serial_tlv = tbs_r.expect(TAG_INTEGER)?;
    let signature_algorithm = parse_algorithm(&mut tbs_r)?;
    let issuer = parse_name(&mut tbs_r)?;
    let (not_before, not_after) = parse_validity(&mut tbs_r)?;
    let subject = parse_name(&mut tbs_r)?;
    let public_key = parse_subject_public_key(&mut tbs_r)?;
    let ext = parse_tbs_trailer(&mut tbs_r, version)?;

    let outer_algorithm = parse_algorithm(&mut outer)?;
    if outer_algorithm != signature_algorithm {
        return Err(CertError::Invalid("signature algorithm mismatch"));
    }
    let signature = bit_string_bytes(outer.expect(TAG_BIT_STRING)?.value)?;
    if !outer.at_end() {
        return Err(CertError::Invalid("trailing data after signature"));
    }

    // Hash the exact transmitted TBS range now; re-deriving it later would
    // risk hashing a re-encoding instead of what was signed.
    let tbs_hash = signature_algorithm
        .digest()
        .map(|kind| digest_bytes(kind, tbs.raw));

    let self_signed = !subject.is_empty() && subject == issuer;
    let serial_hex = hex::encode(serial_tlv.value);

    Ok(Certificate {
        subject,
        issuer,
        serial: serial_tlv.value.to_vec(),
        serial_hex,
        not_before,
        not_after,
        public_key,
        signature_algorithm,
        signature,
        tbs_hash,
        self_signed,
        key_usage: ext.key_usage,
        ext_key_usage: ext.ext_key_usage,
        basic_constraints: ext.basic_constraints,
        subject_alt_names: ext.subject_alt_names,
        authority_info_access: ext.authority_info_access,
        unrecognized_critical: ext.unrecognized_critical,
    })
}

fn parse_version(tbs_r: &mut DerReader<'_>) -> Result<u32, CertError> {
    if tbs_r.peek_tag() != Some(tag_context(0)) {
        return Ok(1);
    }
    let wrapper = tbs_r.read()?;
    let version_tlv = wrapper.reader().expect(TAG_INTEGER)?;
    match version_tlv.value {
        [n @ 0..=2] => Ok(u32::from(*n) + 1),
        _ => Err(CertError::Invalid("version")),
    }
}

fn parse_algorithm(reader: &mut DerReader<'_>) -> Result<SignatureAlgorithm, CertError> {
    let mut alg = reader.sequence()?;
    let oid = alg.expect(TAG_OID)?;
    // optional parameters (NULL for the RSA family) are ignored
    Ok(SignatureAlgorithm::from_oid(oid.value))
}

fn name_attribute_label(oid: &[u8]) -> Option<&'static str> {
    NAME_ATTRIBUTES
        .iter()
        .find(|(bytes, _)| *bytes == oid)
        .map(|(_, label)| *label)
}

fn attribute_text(tlv: Tlv<'_>) -> String {
    match std::str::from_utf8(tlv.value) {
        Ok(text) => text.to_owned(),
        Err(_) => hex::encode(tlv.value),
    }
}

fn parse_name(reader: &mut DerReader<'_>) -> Result<String, CertError> {
    let mut name_r = reader.sequence()?;
    let mut rendered = String::new();
    while !name_r.at_end() {
        let mut rdn = name_r.expect(TAG_SET)?.reader();
        while !rdn.at_end() {
            let mut atv = rdn.sequence()?;
            let oid = atv.expect(TAG_OID)?;
            let value = atv.read()?;
            if !rendered.is_empty() {
                rendered.push(';');
            }
            match name_attribute_label(oid.value) {
                Some(label) => rendered.push_str(label),
                None => rendered.push_str(&hex::encode(oid.value)),
            }
            rendered.push('=');
            rendered.push_str(&attribute_text(value));
        }
    }
    Ok(rendered)
}

fn parse_utc_time(content: &[u8]) -> Result<DateTime<Utc>, CertError> {
    if content.len() != 13 || content[12] != b'Z' {
        return Err(CertError::Invalid("validity time"));
    }
    let digits = &content[..12];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(CertError::Invalid("validity time"));
    }
    let field = |i: usize| i32::from(digits[i] - b'0') * 10 + i32::from(digits[i + 1] - b'0');
    let yy = field(0);
    let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
    let month = u32::try_from(field(2)).map_err(|_| CertError::Invalid("validity time"))?;
    let day = u32::try_from(field(4)).map_err(|_| CertError::Invalid("validity time"))?;
    let hour = u32::try_from(field(6)).map_err(|_| CertError::Invalid("validity time"))?;
    let minute = u32::try_from(field(8)).map_err(|_| CertError::Invalid("validity time"))?;
    let second = u32::try_from(field(10)).map_err(|_| CertError::Invalid("validity time"))?;
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or(CertError::Invalid("validity time"))
}

fn parse_validity(reader: &mut DerReader<'_>) -> Result<(DateTime<Utc>, DateTime<Utc>), CertError> {
    let mut validity = reader.sequence()?;
    let not_before = parse_utc_time(validity.expect(TAG_UTC_TIME)?.value)?;
    let not_after = parse_utc_time(validity.expect(TAG_UTC_TIME)?.value)?;
    Ok((not_before, not_after))
}

fn parse_subject_public_key(reader: &mut DerReader<'_>) -> Result<Option<RsaKey>, CertError> {
    let mut spki = reader.sequence()?;
    let algorithm = parse_algorithm(&mut spki)?;
    let key_bits = bit_string_bytes(spki.expect(TAG_BIT_STRING)?.value)?;
    if algorithm != SignatureAlgorithm::RsaEncryption {
        // only RSA keys are decoded into usable material
        return Ok(None);
    }
    let mut key_top = DerReader::new(&key_bits);
    let mut key_seq = key_top.sequence()?;
    let modulus = integer_magnitude(key_seq.expect(TAG_INTEGER)?.value).to_vec();
    let exponent = integer_magnitude(key_seq.expect(TAG_INTEGER)?.value).to_vec();
    Ok(Some(RsaKey { modulus, exponent }))
}

fn parse_tbs_trailer(
    tbs_r: &mut DerReader<'_>,
    version: u32,
) -> Result<ExtensionSummary, CertError> {
    let mut summary = ExtensionSummary::default();
    while let Some(tag) = tbs_r.peek_tag() {
        if tag == tag_context(3) {
            if version < 3 {
                return Err(CertError::Invalid("extensions on a pre-v3 certificate"));
            }
            let wrapper = tbs_r.read()?;
            parse_extensions(&wrapper, &mut summary)?;
        } else if tag == tag_context(1)
            || tag == tag_context(2)
            || tag == tag_context_primitive(1)
            || tag == tag_context_primitive(2)
        {
            // issuer/subject unique identifiers, not used
            let _ = tbs_r.read()?;
        } else {
            return Err(CertError::Invalid("unexpected element in TBSCertificate"));
        }
    }
    Ok(summary)
}

fn parse_extensions(wrapper: &Tlv<'_>, summary: &mut ExtensionSummary) -> Result<(), CertError> {
    let mut list = wrapper.reader().sequence()?;
    while !list.at_end() {
        let mut ext = list.sequence()?;
        let oid = ext.expect(TAG_OID)?.value.to_vec();
        let critical = if ext.peek_tag() == Some(TAG_BOOLEAN) {
            ext.read()?.value.first().is_some_and(|&b| b != 0)
        } else {
            false
        };
        let value = ext.expect(TAG_OCTET_STRING)?;

        if oid == OID_EXT_KEY_USAGE {
            summary.key_usage = Some(parse_key_usage(&value)?);
        } else if oid == OID_EXT_SUBJECT_ALT_NAME {
            summary.subject_alt_names = parse_general_names(&value)?;
        } else if oid == OID_EXT_BASIC_CONSTRAINTS {
            summary.basic_constraints = parse_basic_constraints(&value)?;
        } else if oid == OID_EXT_EXTENDED_KEY_USAGE {
            summary.ext_key_usage = parse_ext_key_usage(&value, critical)?;
        } else if oid == OID_EXT_AUTHORITY_INFO_ACCESS {
            summary.authority_info_access = parse_authority_info_access(&value)?;
        } else if critical {
            summary.unrecognized_critical = true;
        }
    }
    Ok(())
}

fn parse_key_usage(value: &Tlv<'_>) -> Result<u32, CertError> {
    let bits_tlv = value.reader().expect(TAG_BIT_STRING)?;
    let (&unused, bytes) = bits_tlv
        .value
        .split_first()
        .ok_or(DerError::Malformed("key usage"))?;
    if unused > 7 || (unused > 0 && bytes.is_empty()) {
        return Err(CertError::Der(DerError::Malformed("key usage")));
    }
    let total = bytes.len() * 8 - usize::from(unused);
    let mut mask: u32 = 0;
    for index in 0..total.min(32) {
        let byte = bytes[index / 8];
        let bit = 0x80_u8 >> (index % 8);
        if byte & bit != 0 {
            mask |= 1 << index;
        }
    }
    Ok(mask)
}

fn general_name(tlv: Tlv<'_>) -> GeneralName {
    let tag_number = tlv.tag & 0x1F;
    let text = || std::str::from_utf8(tlv.value).map(ToOwned::to_owned);
    if (tlv.tag & 0xC0) == 0x80 && (tlv.tag & 0x20) == 0 {
        match (tag_number, text()) {
            (1, Ok(s)) => return GeneralName::Rfc822Name(s),
            (2, Ok(s)) => return GeneralName::DnsName(s),
            (6, Ok(s)) => return GeneralName::Uri(s),
            _ => {}
        }
    }
    GeneralName::Other {
        tag: tag_number,
        data: tlv.value.to_vec(),
    }
}

fn parse_general_names(value: &Tlv<'_>) -> Result<Vec<GeneralName>, CertError> {
    let mut names_r = value.reader().sequence()?;
    let mut names = Vec::new();
    while !names_r.at_end() {
        names.push(general_name(names_r.read()?));
    }
    Ok(names)
}

fn parse_basic_constraints(value: &Tlv<'_>) -> Result<BasicConstraints, CertError> {
    let mut bc = value.reader().sequence()?;
    let mut is_ca = false;
    if bc.peek_tag() == Some(TAG_BOOLEAN) {
        is_ca = bc.read()?.value.first().is_some_and(|&b| b != 0);
    }
    let path_len = if !is_ca {
        PathLen::Missing
    } else if bc.peek_tag() == Some(TAG_INTEGER) {
        let content = bc.read()?.value;
        let magnitude = integer_magnitude(content);
        if magnitude.len() > 4 {
            return Err(CertError::Invalid("path length constraint"));
        }
        let mut n: u32 = 0;
        for &byte in magnitude {
            n = (n << 8) | u32::from(byte);
        }
        PathLen::Length(n)
    } else {
        PathLen::Unlimited
    };
    Ok(BasicConstraints { is_ca, path_len })
}

fn parse_ext_key_usage(value: &Tlv<'_>, critical: bool) -> Result<Option<u32>, CertError> {
    let mut purposes = value.reader().sequence()?;
    let mut mask: u32 = 0;
    while !purposes.at_end() {
        let oid = purposes.expect(TAG_OID)?;
        if oid.value == OID_ANY_EXTENDED_KEY_USAGE {
            mask = u32::MAX;
            continue;
        }
        let recognized = oid
            .value
            .split_last()
            .filter(|(last, prefix)| *prefix == OID_KEY_PURPOSE_PREFIX && **last < 32)
            .map(|(last, _)| *last);
        match recognized {
            Some(purpose) => mask |= 1 << purpose,
            None if critical => {
                return Err(CertError::Invalid(
                    "unrecognized purpose in critical extended key usage",
                ));
            }
            // a non-critical value with an unknown purpose is discarded
            // wholesale, never partially applied
            None => return Ok(None),
        }
    }
    Ok(Some(mask))
}

fn parse_authority_info_access(value: &Tlv<'_>) -> Result<Vec<AccessDescription>, CertError> {
    let mut list = value.reader().sequence()?;
    let mut entries = Vec::new();
    while !list.at_end() {
        let mut access = list.sequence()?;
        let method = oid_to_string(access.expect(TAG_OID)?.value);
        let location = general_name(access.read()?);
        if matches!(
            location,
            GeneralName::Rfc822Name(_) | GeneralName::DnsName(_) | GeneralName::Uri(_)
        ) {
            entries.push(AccessDescription { method, location });
        }
    }
    Ok(entries)
}
