//! Hand-rolled DER builders for certificate fixtures.
#![allow(dead_code)]

use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};

use otapkg_x509::cert::{parse_certificate, Certificate};
use otapkg_x509::verify::DIGEST_INFO_SHA1;

pub const OID_SHA1_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x05];
pub const OID_MD2_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x02];
pub const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
pub const OID_CN: &[u8] = &[0x55, 0x04, 0x03];
pub const OID_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x0F];
pub const OID_BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1D, 0x13];
pub const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1D, 0x11];
pub const OID_EXT_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25];

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    }
    out.extend_from_slice(content);
    out
}

pub fn seq(parts: &[&[u8]]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

pub fn set(parts: &[&[u8]]) -> Vec<u8> {
    tlv(0x31, &parts.concat())
}

pub fn integer(magnitude: &[u8]) -> Vec<u8> {
    let mut content = Vec::new();
    if magnitude.first().is_none_or(|b| b & 0x80 != 0) {
        content.push(0);
    }
    content.extend_from_slice(magnitude);
    tlv(0x02, &content)
}

pub fn small_int(n: u8) -> Vec<u8> {
    integer(&[n])
}

pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(0x06, content)
}

pub fn null() -> Vec<u8> {
    vec![0x05, 0x00]
}

pub fn boolean(value: bool) -> Vec<u8> {
    tlv(0x01, &[if value { 0xFF } else { 0x00 }])
}

pub fn bit_string(bytes: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8];
    content.extend_from_slice(bytes);
    tlv(0x03, &content)
}

pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
    tlv(0x04, bytes)
}

pub fn printable(text: &str) -> Vec<u8> {
    tlv(0x13, text.as_bytes())
}

pub fn utc(text: &str) -> Vec<u8> {
    tlv(0x17, text.as_bytes())
}

pub fn ctx(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0xA0 | n, content)
}

pub fn ctx_primitive(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0x80 | n, content)
}

pub fn cn_name(cn: &str) -> Vec<u8> {
    if cn.is_empty() {
        return seq(&[]);
    }
    let atv = seq(&[&oid(OID_CN), &printable(cn)]);
    seq(&[&set(&[&atv])])
}

pub fn extension(ext_oid: &[u8], critical: bool, value: &[u8]) -> Vec<u8> {
    if critical {
        seq(&[&oid(ext_oid), &boolean(true), &octet_string(value)])
    } else {
        seq(&[&oid(ext_oid), &octet_string(value)])
    }
}

/// `BasicConstraints` value: `ca` plus optional path length.
pub fn basic_constraints(ca: bool, path_len: Option<u8>) -> Vec<u8> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    if ca {
        parts.push(boolean(true));
    }
    if let Some(n) = path_len {
        parts.push(small_int(n));
    }
    let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    seq(&refs)
}

/// `KeyUsage` value: a one-octet bit string, bit 0 = 0x80.
pub fn key_usage(first_octet: u8) -> Vec<u8> {
    tlv(0x03, &[0x00, first_octet])
}

pub struct CertParams<'a> {
    pub subject_cn: &'a str,
    pub issuer_cn: &'a str,
    pub not_before: &'a str,
    pub not_after: &'a str,
    pub serial: u8,
    pub sig_oid: &'a [u8],
    pub extensions: Vec<Vec<u8>>,
}

impl Default for CertParams<'_> {
    fn default() -> Self {
        Self {
            subject_cn: "Leaf",
            issuer_cn: "Root",
            not_before: "200101000000Z",
            not_after: "490101000000Z",
            serial: 1,
            sig_oid: OID_SHA1_WITH_RSA,
            extensions: Vec::new(),
        }
    }
}

/// A CA certificate's extension set: certSign key usage plus
/// `BasicConstraints` with the given path length (`None` = unlimited).
pub fn ca_extensions(path_len: Option<u8>) -> Vec<Vec<u8>> {
    vec![
        extension(OID_KEY_USAGE, true, &key_usage(0x04)),
        extension(OID_BASIC_CONSTRAINTS, true, &basic_constraints(true, path_len)),
    ]
}

pub fn gen_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("test key generation")
}

fn spki(key: &RsaPrivateKey) -> Vec<u8> {
    let public = key.to_public_key();
    let rsa_key = seq(&[
        &integer(&public.n().to_bytes_be()),
        &integer(&public.e().to_bytes_be()),
    ]);
    seq(&[
        &seq(&[&oid(OID_RSA_ENCRYPTION), &null()]),
        &bit_string(&rsa_key),
    ])
}

/// Build and sign a version-3 certificate.
pub fn build_cert(params: &CertParams<'_>, subject_key: &RsaPrivateKey, signer_key: &RsaPrivateKey) -> Vec<u8> {
    let alg = seq(&[&oid(params.sig_oid), &null()]);
    let validity = seq(&[&utc(params.not_before), &utc(params.not_after)]);

    let mut tbs_parts: Vec<Vec<u8>> = vec![
        ctx(0, &small_int(2)),
        small_int(params.serial),
        alg.clone(),
        cn_name(params.issuer_cn),
        validity,
        cn_name(params.subject_cn),
        spki(subject_key),
    ];
    if !params.extensions.is_empty() {
        let refs: Vec<&[u8]> = params.extensions.iter().map(Vec::as_slice).collect();
        tbs_parts.push(ctx(3, &seq(&refs)));
    }
    let tbs_refs: Vec<&[u8]> = tbs_parts.iter().map(Vec::as_slice).collect();
    let tbs = seq(&tbs_refs);

    let digest = Sha1::digest(&tbs);
    let scheme = Pkcs1v15Sign {
        hash_len: Some(20),
        prefix: DIGEST_INFO_SHA1.into(),
    };
    let signature = signer_key
        .sign(scheme, &digest)
        .expect("test signature");

    seq(&[&tbs, &alg, &bit_string(&signature)])
}

pub fn parse(der: &[u8]) -> Certificate {
    parse_certificate(der, 0, der.len()).expect("fixture certificate parses")
}
