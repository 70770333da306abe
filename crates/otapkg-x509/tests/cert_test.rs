mod common;

use common::{
    build_cert, ca_extensions, ctx, ctx_primitive, extension, gen_key, key_usage, oid, parse,
    printable, seq, set, small_int, CertParams, OID_BASIC_CONSTRAINTS, OID_CN, OID_EXT_KEY_USAGE,
    OID_SUBJECT_ALT_NAME,
};
use otapkg_x509::cert::{parse_certificate, GeneralName, PathLen, SignatureAlgorithm};
use otapkg_x509::error::CertError;

#[test]
fn parses_core_fields() {
    let root_key = gen_key();
    let leaf_key = gen_key();
    let der = build_cert(
        &CertParams {
            serial: 7,
            ..CertParams::default()
        },
        &leaf_key,
        &root_key,
    );
    let cert = parse(&der);

    assert_eq!(cert.subject(), "CN=Leaf");
    assert_eq!(cert.issuer(), "CN=Root");
    assert_eq!(cert.serial_hex(), "07");
    assert_eq!(cert.serial(), &[7]);
    assert_eq!(cert.signature_algorithm(), SignatureAlgorithm::Sha1WithRsa);
    assert_eq!(cert.tbs_hash().map(<[u8]>::len), Some(20));
    assert!(!cert.is_self_signed());
    assert!(cert.public_key().is_some());
    assert_eq!(cert.not_before().to_rfc3339(), "2020-01-01T00:00:00+00:00");
    assert_eq!(cert.not_after().to_rfc3339(), "2049-01-01T00:00:00+00:00");
}

#[test]
fn self_signed_flag_follows_names() {
    let key = gen_key();
    let der = build_cert(
        &CertParams {
            subject_cn: "Root",
            issuer_cn: "Root",
            extensions: ca_extensions(None),
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert!(parse(&der).is_self_signed());
}

#[test]
fn key_usage_bits_are_msb_first() {
    let key = gen_key();
    // 0x80 = bit 0 (digitalSignature), 0x04 = bit 5 (keyCertSign)
    let der = build_cert(
        &CertParams {
            extensions: vec![extension(common::OID_KEY_USAGE, true, &key_usage(0x84))],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert_eq!(parse(&der).key_usage(), Some(1 | (1 << 5)));
}

#[test]
fn basic_constraints_variants() {
    let key = gen_key();

    let unlimited = build_cert(
        &CertParams {
            extensions: ca_extensions(None),
            ..CertParams::default()
        },
        &key,
        &key,
    );
    let bc = parse(&unlimited).basic_constraints();
    assert!(bc.is_ca);
    assert_eq!(bc.path_len, PathLen::Unlimited);

    let bounded = build_cert(
        &CertParams {
            extensions: ca_extensions(Some(2)),
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert_eq!(parse(&bounded).basic_constraints().path_len, PathLen::Length(2));

    let plain = build_cert(&CertParams::default(), &key, &key);
    let bc = parse(&plain).basic_constraints();
    assert!(!bc.is_ca);
    assert_eq!(bc.path_len, PathLen::Missing);
}

#[test]
fn subject_alt_names_decode_text_kinds_only() {
    let key = gen_key();
    let san = seq(&[
        &ctx_primitive(1, b"ops@example.com"),
        &ctx_primitive(2, b"pkg.example.com"),
        &ctx_primitive(6, b"http://pkg.example.com"),
        &ctx_primitive(7, &[10, 0, 0, 1]),
    ]);
    let der = build_cert(
        &CertParams {
            subject_cn: "",
            extensions: vec![extension(OID_SUBJECT_ALT_NAME, false, &san)],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    let cert = parse(&der);
    assert_eq!(cert.subject(), "");
    assert_eq!(
        cert.subject_alt_names(),
        &[
            GeneralName::Rfc822Name("ops@example.com".to_owned()),
            GeneralName::DnsName("pkg.example.com".to_owned()),
            GeneralName::Uri("http://pkg.example.com".to_owned()),
            GeneralName::Other {
                tag: 7,
                data: vec![10, 0, 0, 1]
            },
        ]
    );
}

#[test]
fn non_critical_eku_with_unknown_purpose_is_discarded_wholesale() {
    let key = gen_key();
    let known = oid(&[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03]);
    let unknown = oid(&[0x2B, 0x06, 0x01, 0x04, 0x01, 0x99, 0x01]);
    let eku = seq(&[&known, &unknown]);
    let der = build_cert(
        &CertParams {
            extensions: vec![extension(OID_EXT_KEY_USAGE, false, &eku)],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert_eq!(parse(&der).ext_key_usage(), None);
}

#[test]
fn critical_eku_with_unknown_purpose_fails_closed() {
    let key = gen_key();
    let unknown = oid(&[0x2B, 0x06, 0x01, 0x04, 0x01, 0x99, 0x01]);
    let eku = seq(&[&unknown]);
    let der = build_cert(
        &CertParams {
            extensions: vec![extension(OID_EXT_KEY_USAGE, true, &eku)],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert!(matches!(
        parse_certificate(&der, 0, der.len()),
        Err(CertError::Invalid(_))
    ));
}

#[test]
fn recognized_eku_purposes_set_bits() {
    let key = gen_key();
    let code_signing = oid(&[0x2B, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03]);
    let eku = seq(&[&code_signing]);
    let der = build_cert(
        &CertParams {
            extensions: vec![extension(OID_EXT_KEY_USAGE, false, &eku)],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert_eq!(parse(&der).ext_key_usage(), Some(1 << 3));
}

#[test]
fn unknown_critical_extension_sets_flag() {
    let key = gen_key();
    let der = build_cert(
        &CertParams {
            extensions: vec![extension(&[0x55, 0x1D, 0x63], true, &seq(&[]))],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert!(parse(&der).has_unrecognized_critical_extension());

    let der = build_cert(
        &CertParams {
            extensions: vec![extension(&[0x55, 0x1D, 0x63], false, &seq(&[]))],
            ..CertParams::default()
        },
        &key,
        &key,
    );
    assert!(!parse(&der).has_unrecognized_critical_extension());
}

#[test]
fn extensions_on_version_one_certificate_are_rejected() {
    let key = gen_key();
    // TBS with no version tag (v1) but with an extensions block.
    let alg = seq(&[&oid(common::OID_SHA1_WITH_RSA), &common::null()]);
    let name = seq(&[&set(&[&seq(&[&oid(OID_CN), &printable("X")])])]);
    let validity = seq(&[&common::utc("200101000000Z"), &common::utc("490101000000Z")]);
    let bc = extension(OID_BASIC_CONSTRAINTS, true, &common::basic_constraints(true, None));
    let public = key.to_public_key();
    let spki = {
        use rsa::traits::PublicKeyParts;
        let rsa_key = seq(&[
            &common::integer(&public.n().to_bytes_be()),
            &common::integer(&public.e().to_bytes_be()),
        ]);
        seq(&[
            &seq(&[&oid(common::OID_RSA_ENCRYPTION), &common::null()]),
            &common::bit_string(&rsa_key),
        ])
    };
    let tbs = seq(&[
        &small_int(1),
        &alg,
        &name,
        &validity,
        &name,
        &spki,
        &ctx(3, &seq(&[&bc])),
    ]);
    let der = seq(&[&tbs, &alg, &common::bit_string(&[0u8; 4])]);

    assert!(matches!(
        parse_certificate(&der, 0, der.len()),
        Err(CertError::Invalid(_))
    ));
}

#[test]
fn truncated_input_is_corrupt() {
    let key = gen_key();
    let der = build_cert(&CertParams::default(), &key, &key);
    let cut = der.len() - 5;
    assert!(matches!(
        parse_certificate(&der, 0, cut),
        Err(CertError::Der(_))
    ));
}

#[test]
fn out_of_range_slice_is_rejected() {
    let der = [0x30, 0x03, 1, 2, 3];
    assert_eq!(
        parse_certificate(&der, 2, 10).unwrap_err(),
        CertError::OutOfRange
    );
}
