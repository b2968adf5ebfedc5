// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Builders for crafted PE images, authenticode signatures and catalogs.

#![allow(dead_code)]

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos,
};
use const_oid::db::rfc5911::{
    ID_CONTENT_TYPE, ID_COUNTERSIGNATURE, ID_DATA, ID_MESSAGE_DIGEST,
    ID_SIGNED_DATA, ID_SIGNING_TIME,
};
use const_oid::db::rfc5912::{
    ECDSA_WITH_SHA_256, ID_SHA_1, ID_SHA_256, RSA_ENCRYPTION,
};
use der::asn1::{Any, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Decode, DecodePem, Encode, Tag};
use sigtrust::{
    authenticode_digest, CatalogIdSequence, CatalogMember, CertificateTrustList,
    DataObjectSequence, DigestAlgorithm, DigestInfo, HashObject, LenientSetOf,
    MemberInfo, OidSequence, PeImage, SpcAttributeTypeAndOptionalValue,
    SpcIndirectDataContent, CAT_MEMBERINFO_OBJID, SPC_INDIRECT_DATA_OBJID,
    SPC_PE_IMAGE_DATA_OBJID, SZ_OID_CATALOG_LIST, SZ_OID_CATALOG_LIST_MEMBER,
    SZ_OID_CTL,
};
use spki::AlgorithmIdentifierOwned;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

pub const SIGNER_CERT: &str = include_str!("../data/signer_cert.pem");
pub const SIGNER_KEY: &str = include_str!("../data/signer_key.pem");
pub const TIMESTAMP_CERT: &str = include_str!("../data/timestamp_cert.pem");
pub const TIMESTAMP_KEY: &str = include_str!("../data/timestamp_key.pem");
pub const ECDSA_CERT: &str = include_str!("../data/ecdsa_cert.pem");
pub const ECDSA_KEY: &str = include_str!("../data/ecdsa_key.pem");

/// Serial of `signer_cert.pem`.
pub const SIGNER_SERIAL: &str = "743cb60894534e56c17e648c5f42506c21bc67d4";

/// 2027-01-01T00:00:00Z, inside every fixture's validity period.
pub const IN_VALIDITY: u64 = 1_798_761_600;

/// 2040-01-01T00:00:00Z, after every fixture has expired.
pub const AFTER_EXPIRY: u64 = 2_208_988_800;

pub const E_LFANEW: usize = 0x40;
const OPTIONAL_HEADER: usize = E_LFANEW + 4 + 20;
const OPTIONAL_HEADER_SIZE: usize = 96 + 16 * 8;
const SECTION_TABLE: usize = OPTIONAL_HEADER + OPTIONAL_HEADER_SIZE;
const HEADERS_SIZE: usize = 0x200;
const FILE_ALIGNMENT: usize = 0x200;

/// File offset of the optional header's `CheckSum`.
pub const CHECKSUM_OFFSET: usize = OPTIONAL_HEADER + 64;
/// File offset of the optional header's `NumberOfRvaAndSizes`.
pub const NUM_DATA_DIRS_OFFSET: usize = OPTIONAL_HEADER + 92;
/// File offset of the security data directory entry.
pub const SECURITY_DIR_OFFSET: usize = OPTIONAL_HEADER + 96 + 4 * 8;
/// File offset of the `.text` section's raw data.
pub const TEXT_OFFSET: usize = HEADERS_SIZE;

pub fn time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn u32_of(value: usize) -> u32 {
    u32::try_from(value).unwrap()
}

/// A minimal i386 PE32 image with one `.text` section holding `payload`.
pub fn build_pe(payload: &[u8]) -> Vec<u8> {
    let raw_size = align(payload.len().max(1), FILE_ALIGNMENT);
    let mut pe = vec![0; HEADERS_SIZE + raw_size];

    // DOS header.
    pe[0..2].copy_from_slice(b"MZ");
    put_u32(&mut pe, 0x3c, u32_of(E_LFANEW));

    // NT signature and file header.
    pe[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");
    let file_header = E_LFANEW + 4;
    put_u16(&mut pe, file_header, 0x14c);
    put_u16(&mut pe, file_header + 2, 1);
    put_u16(&mut pe, file_header + 16, OPTIONAL_HEADER_SIZE as u16);
    put_u16(&mut pe, file_header + 18, 0x0102);

    // Optional header.
    let opt = OPTIONAL_HEADER;
    put_u16(&mut pe, opt, 0x10b);
    put_u32(&mut pe, opt + 4, u32_of(raw_size));
    put_u32(&mut pe, opt + 16, 0x1000);
    put_u32(&mut pe, opt + 20, 0x1000);
    put_u32(&mut pe, opt + 28, 0x40_0000);
    put_u32(&mut pe, opt + 32, 0x1000);
    put_u32(&mut pe, opt + 36, u32_of(FILE_ALIGNMENT));
    put_u16(&mut pe, opt + 40, 6);
    put_u16(&mut pe, opt + 48, 6);
    put_u32(&mut pe, opt + 56, u32_of(0x1000 + align(raw_size, 0x1000)));
    put_u32(&mut pe, opt + 60, u32_of(HEADERS_SIZE));
    put_u32(&mut pe, CHECKSUM_OFFSET, 0x1234_5678);
    put_u16(&mut pe, opt + 68, 3);
    put_u32(&mut pe, NUM_DATA_DIRS_OFFSET, 16);

    // Section table.
    let section = SECTION_TABLE;
    pe[section..section + 5].copy_from_slice(b".text");
    put_u32(&mut pe, section + 8, u32_of(payload.len()));
    put_u32(&mut pe, section + 12, 0x1000);
    put_u32(&mut pe, section + 16, u32_of(raw_size));
    put_u32(&mut pe, section + 20, u32_of(TEXT_OFFSET));
    put_u32(&mut pe, section + 36, 0x6000_0020);

    pe[TEXT_OFFSET..TEXT_OFFSET + payload.len()].copy_from_slice(payload);
    pe
}

/// Append a certificate table holding `blobs` and point the security
/// directory at it.
pub fn attach_signatures(pe: &[u8], blobs: &[&[u8]]) -> Vec<u8> {
    let mut table = Vec::new();
    for blob in blobs {
        table.extend_from_slice(&u32_of(8 + blob.len()).to_le_bytes());
        table.extend_from_slice(&0x0200u16.to_le_bytes());
        table.extend_from_slice(&0x0002u16.to_le_bytes());
        table.extend_from_slice(blob);
        table.resize(align(table.len(), 8), 0);
    }

    let mut out = pe.to_vec();
    assert_eq!(out.len() % 8, 0);
    let out_len = u32_of(out.len());
    put_u32(&mut out, SECURITY_DIR_OFFSET, out_len);
    put_u32(&mut out, SECURITY_DIR_OFFSET + 4, u32_of(table.len()));
    out.extend(table);
    out
}

pub fn sha256_authenticode(pe: &[u8]) -> Vec<u8> {
    let pe = PeImage::parse(pe).unwrap();
    DigestAlgorithm::Sha256
        .compute(|hasher| authenticode_digest(&pe, hasher))
        .unwrap()
}

pub fn sha1_authenticode(pe: &[u8]) -> Vec<u8> {
    let pe = PeImage::parse(pe).unwrap();
    DigestAlgorithm::Sha1
        .compute(|hasher| authenticode_digest(&pe, hasher))
        .unwrap()
}

pub fn certificate(pem: &str) -> Certificate {
    Certificate::from_pem(pem).unwrap()
}

fn any<T: Encode>(value: &T) -> Any {
    Any::from_der(&value.to_der().unwrap()).unwrap()
}

fn attribute<T: Encode>(oid: ObjectIdentifier, value: &T) -> Attribute {
    Attribute {
        oid,
        values: SetOfVec::try_from(vec![any(value)]).unwrap(),
    }
}

fn rsa_sign(key_pem: &str, data: &[u8]) -> Vec<u8> {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{SignatureEncoding, Signer};

    let key = rsa::RsaPrivateKey::from_pkcs8_pem(key_pem).unwrap();
    let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key);
    signing_key.sign(data).to_vec()
}

fn ecdsa_sign(key_pem: &str, data: &[u8]) -> Vec<u8> {
    use p256::ecdsa::signature::Signer;
    use p256::pkcs8::DecodePrivateKey;

    let key = p256::ecdsa::SigningKey::from_pkcs8_pem(key_pem).unwrap();
    let signature: p256::ecdsa::Signature = key.sign(data);
    signature.to_der().as_bytes().to_vec()
}

fn sha256_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ID_SHA_256,
        parameters: None,
    }
}

fn issuer_and_serial(cert: &Certificate) -> SignerIdentifier {
    SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    })
}

/// Which key signs a signer info.
#[derive(Clone, Copy)]
enum Key {
    Rsa(&'static str),
    Ecdsa(&'static str),
}

/// A signer info over `content` with `contentType`, `messageDigest` and
/// any `extra` signed attributes.
fn signer_info(
    cert: &Certificate,
    key: Key,
    content_type: ObjectIdentifier,
    content: &[u8],
    extra: Vec<Attribute>,
) -> SignerInfo {
    let digest = DigestAlgorithm::Sha256.digest(content);
    let mut attrs = vec![
        attribute(ID_CONTENT_TYPE, &content_type),
        attribute(ID_MESSAGE_DIGEST, &OctetString::new(digest).unwrap()),
    ];
    attrs.extend(extra);
    let signed_attrs = SetOfVec::try_from(attrs).unwrap();
    let to_sign = signed_attrs.to_der().unwrap();

    let (signature_algorithm, signature) = match key {
        Key::Rsa(pem) => (
            AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: Some(Any::null()),
            },
            rsa_sign(pem, &to_sign),
        ),
        Key::Ecdsa(pem) => (
            AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA_256,
                parameters: None,
            },
            ecdsa_sign(pem, &to_sign),
        ),
    };

    SignerInfo {
        version: CmsVersion::V1,
        sid: issuer_and_serial(cert),
        digest_alg: sha256_algorithm(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm,
        signature: OctetString::new(signature).unwrap(),
        unsigned_attrs: None,
    }
}

fn content_info(signed_data: &SignedData) -> Vec<u8> {
    ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: any(signed_data),
    }
    .to_der()
    .unwrap()
}

/// How to build an authenticode signature.
#[derive(Clone, Default)]
pub struct SignOptions {
    /// Embed this digest instead of the image's.
    pub digest: Option<Vec<u8>>,
    /// Add a PKCS#9 countersignature made at this time.
    pub countersign_at: Option<u64>,
}

/// An authenticode `ContentInfo` over `digest`, signed with the RSA
/// fixture.
pub fn authenticode_blob(digest: &[u8], countersign_at: Option<u64>) -> Vec<u8> {
    let signer_cert = certificate(SIGNER_CERT);
    let timestamp_cert = certificate(TIMESTAMP_CERT);

    let indirect = SpcIndirectDataContent {
        data: SpcAttributeTypeAndOptionalValue {
            value_type: SPC_PE_IMAGE_DATA_OBJID,
            value: Any::new(Tag::Sequence, Vec::new()).unwrap(),
        },
        message_digest: DigestInfo {
            digest_algorithm: AlgorithmIdentifierOwned {
                oid: ID_SHA_256,
                parameters: Some(Any::null()),
            },
            digest: OctetString::new(digest.to_vec()).unwrap(),
        },
    };
    let econtent = any(&indirect);

    let mut signer = signer_info(
        &signer_cert,
        Key::Rsa(SIGNER_KEY),
        SPC_INDIRECT_DATA_OBJID,
        econtent.value(),
        Vec::new(),
    );

    let mut certificates = vec![CertificateChoices::Certificate(signer_cert)];
    if let Some(at) = countersign_at {
        let signing_time =
            Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(at)).unwrap());
        let countersigner = signer_info(
            &timestamp_cert,
            Key::Rsa(TIMESTAMP_KEY),
            ID_DATA,
            signer.signature.as_bytes(),
            vec![attribute(ID_SIGNING_TIME, &signing_time)],
        );
        signer.unsigned_attrs = Some(
            SetOfVec::try_from(vec![attribute(ID_COUNTERSIGNATURE, &countersigner)])
                .unwrap(),
        );
        certificates.push(CertificateChoices::Certificate(timestamp_cert));
    }

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![sha256_algorithm()]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: SPC_INDIRECT_DATA_OBJID,
            econtent: Some(econtent),
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certificates).unwrap())),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer]).unwrap()),
    };
    content_info(&signed_data)
}

fn replace_once(bytes: &mut [u8], old: &[u8], new: &[u8]) {
    assert_eq!(old.len(), new.len());
    let start = bytes
        .windows(old.len())
        .position(|window| window == old)
        .unwrap();
    bytes[start..start + old.len()].copy_from_slice(new);
}

/// Like [`authenticode_blob`], but the signed attributes are stored and
/// signed in reverse DER order, as some signing tools emit them.
pub fn authenticode_blob_unsorted_attributes(digest: &[u8]) -> Vec<u8> {
    let mut blob = authenticode_blob(digest, None);
    let signed_data = ContentInfo::from_der(&blob)
        .unwrap()
        .content
        .decode_as::<SignedData>()
        .unwrap();
    let signer = signed_data.signer_infos.0.get(0).unwrap();
    let attrs: Vec<Vec<u8>> = signer
        .signed_attrs
        .as_ref()
        .unwrap()
        .iter()
        .map(|attr| attr.to_der().unwrap())
        .collect();
    assert_eq!(attrs.len(), 2);

    let sorted = attrs.concat();
    let reversed: Vec<u8> = attrs.iter().rev().flatten().copied().collect();
    let signature = rsa_sign(
        SIGNER_KEY,
        &Any::new(Tag::Set, reversed.clone()).unwrap().to_der().unwrap(),
    );

    replace_once(&mut blob, &sorted, &reversed);
    replace_once(&mut blob, signer.signature.as_bytes(), &signature);
    blob
}

/// Sign `pe` and embed the signature.
pub fn sign_pe(pe: &[u8], options: &SignOptions) -> Vec<u8> {
    let digest = options
        .digest
        .clone()
        .unwrap_or_else(|| sha256_authenticode(pe));
    let blob = authenticode_blob(&digest, options.countersign_at);
    attach_signatures(pe, &[&blob])
}

/// One catalog member listing `digest` under `algorithm`.
pub fn catalog_member(algorithm: ObjectIdentifier, digest: &[u8]) -> CatalogMember {
    let data_objects = LenientSetOf(vec![DataObjectSequence {
        pe_image_data: any(&SpcAttributeTypeAndOptionalValue {
            value_type: SPC_PE_IMAGE_DATA_OBJID,
            value: Any::new(Tag::Sequence, Vec::new()).unwrap(),
        }),
        hash_object: HashObject {
            algorithm: OidSequence {
                oid: algorithm,
                parameters: Some(Any::null()),
            },
            digest: OctetString::new(digest.to_vec()).unwrap(),
        },
    }]);

    // The tag is the hex digest as UTF-16LE.
    let tag: Vec<u8> = hex::encode_upper(digest)
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();

    CatalogMember {
        double_encoded: OctetString::new(tag).unwrap(),
        member_set: Some(LenientSetOf(vec![
            MemberInfo {
                oid: CAT_MEMBERINFO_OBJID,
                value: any(&LenientSetOf(vec![any(&OctetString::new(
                    b"{C689AAB8-8E78-11D0-8C47-00C04FC295EE}".to_vec(),
                )
                .unwrap())])),
            },
            MemberInfo {
                oid: SPC_INDIRECT_DATA_OBJID,
                value: any(&data_objects),
            },
        ])),
    }
}

/// A SHA-1 catalog member.
pub fn sha1_member(digest: &[u8]) -> CatalogMember {
    catalog_member(ID_SHA_1, digest)
}

pub fn trust_list(members: Vec<CatalogMember>) -> CertificateTrustList {
    CertificateTrustList {
        catalog_list_oid: CatalogIdSequence {
            oid: SZ_OID_CATALOG_LIST,
        },
        digest: OctetString::new(vec![0x5a; 16]).unwrap(),
        time: Time::UtcTime(
            UtcTime::from_unix_duration(Duration::from_secs(IN_VALIDITY)).unwrap(),
        ),
        member_oid: OidSequence {
            oid: SZ_OID_CATALOG_LIST_MEMBER,
            parameters: Some(Any::null()),
        },
        catalog_list: members,
        cat_name_values: None,
    }
}

/// A catalog file wrapping `trust_list`, signed with the ECDSA fixture.
pub fn catalog_file(trust_list: &CertificateTrustList) -> Vec<u8> {
    let cert = certificate(ECDSA_CERT);
    let econtent = any(trust_list);
    let signer = signer_info(
        &cert,
        Key::Ecdsa(ECDSA_KEY),
        SZ_OID_CTL,
        econtent.value(),
        Vec::new(),
    );

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![sha256_algorithm()]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: SZ_OID_CTL,
            econtent: Some(econtent),
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(cert)]).unwrap(),
        )),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer]).unwrap()),
    };
    content_info(&signed_data)
}
