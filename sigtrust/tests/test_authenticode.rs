// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod common;

use cms::signed_data::SignerIdentifier;
use common::*;
use sigtrust::{
    extract_signatures, AuthenticodeSignature, AuthenticodeValidator,
    DigestAlgorithm, DigestSet, PeImage, PeTrait, SignatureStatus,
    SpcIndirectDataContent, ValidationFailure, SZ_OID_CTL,
};

fn authenticode_digests(pe: &[u8]) -> DigestSet {
    DigestSet::authenticode(&PeImage::parse(pe).unwrap()).unwrap()
}

#[test]
fn test_generic_digests() {
    let digests = DigestSet::generic(b"abc");
    assert_eq!(
        hex::encode(digests.get(DigestAlgorithm::Md5).unwrap()),
        "900150983cd24fb0d6963f7d28e17f72"
    );
    assert_eq!(
        hex::encode(digests.get(DigestAlgorithm::Sha1).unwrap()),
        "a9993e364706816aba3e25717850c26c9cd0d89d"
    );
    assert_eq!(
        hex::encode(digests.get(DigestAlgorithm::Sha256).unwrap()),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_authenticode_digest_properties() {
    let pe = build_pe(b"\xcc\xc3 hello from .text");
    let unsigned = authenticode_digests(&pe);
    assert_eq!(unsigned, authenticode_digests(&pe));
    assert_ne!(unsigned, DigestSet::generic(&pe));

    // Adding a signature does not change the digest.
    let signed = sign_pe(&pe, &SignOptions::default());
    assert_eq!(authenticode_digests(&signed), unsigned);

    // Neither does the checksum.
    let mut patched = pe.clone();
    patched[CHECKSUM_OFFSET] ^= 0xff;
    assert_eq!(authenticode_digests(&patched), unsigned);

    // Or bytes inside the certificate table.
    let mut patched = signed.clone();
    let last = patched.len() - 1;
    patched[last] ^= 0xff;
    assert_eq!(authenticode_digests(&patched), unsigned);

    // Any other byte does.
    let mut patched = pe.clone();
    patched[TEXT_OFFSET] ^= 0xff;
    assert_ne!(authenticode_digests(&patched), unsigned);

    let mut patched = pe;
    patched[E_LFANEW + 8] ^= 0xff;
    assert_ne!(authenticode_digests(&patched), unsigned);
}

#[test]
fn test_without_security_directory() {
    let mut pe = build_pe(b"four data directories");
    pe[NUM_DATA_DIRS_OFFSET..NUM_DATA_DIRS_OFFSET + 4]
        .copy_from_slice(&4u32.to_le_bytes());

    // Only the checksum is left out of the digest.
    let mut hashed = pe[..CHECKSUM_OFFSET].to_vec();
    hashed.extend_from_slice(&pe[CHECKSUM_OFFSET + 4..]);
    assert_eq!(
        sha256_authenticode(&pe),
        DigestAlgorithm::Sha256.digest(&hashed)
    );

    // The bytes a security entry would occupy are ordinary header bytes.
    let mut patched = pe.clone();
    patched[SECURITY_DIR_OFFSET] ^= 0xff;
    assert_ne!(sha256_authenticode(&patched), sha256_authenticode(&pe));

    let image = PeImage::parse(&pe).unwrap();
    assert_eq!(PeTrait::certificate_table_range(&image), Ok(None));
    let validator = AuthenticodeValidator::new(time(IN_VALIDITY));
    assert!(validator.validate(&image).unwrap().is_none());
}

#[test]
fn test_not_pecoff() {
    assert!(PeImage::parse(b"MZ but not really a PE file").is_err());
    assert!(PeImage::parse(&[]).is_err());
}

#[test]
fn test_pe_metadata() {
    let pe = build_pe(b"payload");
    let image = PeImage::parse(&pe).unwrap();
    assert_eq!(image.machine(), 0x14c);
    assert_eq!(image.architecture(), Some(32));
    assert_eq!(image.num_sections(), 1);
    assert_eq!(
        image.section_data_range(1).unwrap(),
        TEXT_OFFSET..TEXT_OFFSET + 0x200
    );

    // No resource directory: empty strings, architecture still set.
    let info = image.version_info();
    assert_eq!(info.companyname, "");
    assert_eq!(info.architecture, Some(32));
}

#[test]
fn test_signature_extraction() {
    let pe = build_pe(b"payload");
    assert!(extract_signatures(&PeImage::parse(&pe).unwrap())
        .unwrap()
        .is_none());

    let digest = sha256_authenticode(&pe);
    let blob = authenticode_blob(&digest, None);
    let signed = attach_signatures(&pe, &[&blob]);
    let image = PeImage::parse(&signed).unwrap();
    let blobs = extract_signatures(&image).unwrap().unwrap();
    assert_eq!(blobs, [blob.as_slice()]);

    let (signature, _) = AuthenticodeSignature::parse(blobs[0]).unwrap();
    let indirect = signature
        .encapsulated_content()
        .unwrap()
        .decode_as::<SpcIndirectDataContent>()
        .unwrap();
    assert_eq!(indirect.message_digest.digest.as_bytes(), digest);
    assert_eq!(
        indirect.message_digest.digest_algorithm.oid,
        const_oid::db::rfc5912::ID_SHA_256
    );
    assert!(signature.signed_attributes_der().is_some());

    let SignerIdentifier::IssuerAndSerialNumber(sid) =
        &signature.signer_info().unwrap().sid
    else {
        panic!("unexpected signer identifier");
    };
    let certificates: Vec<_> = signature.certificates().collect();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].tbs_certificate.subject, sid.issuer);
}

#[test]
fn test_valid_signature() {
    let signed = sign_pe(&build_pe(b"payload"), &SignOptions::default());
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(report.status, SignatureStatus::Valid);
    assert_eq!(report.signature_count, 1);
    assert!(report.countersignature.is_none());

    let signer = report.signer.unwrap();
    assert_eq!(signer.version, "1");
    assert_eq!(signer.subject, "CN=Test Signer,O=Acme Corp,C=US");
    assert_eq!(signer.subject_short_name, "Test Signer");
    assert_eq!(signer.serial_number, SIGNER_SERIAL);
    assert_eq!(signer.digest_algorithm, "sha256");
    assert_eq!(signer.digest_encryption_algorithm, "rsaEncryption");
    assert_eq!(signer.digest_encryption_key_size, 2048);
    assert_eq!(signer.timestamp, None);
}

#[test]
fn test_hash_mismatch_keeps_signer() {
    let options = SignOptions {
        digest: Some(vec![0; 32]),
        ..SignOptions::default()
    };
    let signed = sign_pe(&build_pe(b"payload"), &options);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::HashMismatch)
    );
    assert_eq!(report.signer.unwrap().subject_short_name, "Test Signer");
}

#[test]
fn test_tampered_image() {
    let mut signed = sign_pe(&build_pe(b"payload"), &SignOptions::default());
    signed[TEXT_OFFSET] = b'P';
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::HashMismatch)
    );
}

#[test]
fn test_expired_certificate() {
    let signed = sign_pe(&build_pe(b"payload"), &SignOptions::default());
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(AFTER_EXPIRY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::ChainInvalid {
            checked_at: AFTER_EXPIRY,
            ..
        })
    ));
    assert!(report.signer.is_some());
}

#[test]
fn test_countersignature_time_is_used() {
    let options = SignOptions {
        countersign_at: Some(IN_VALIDITY),
        ..SignOptions::default()
    };
    let signed = sign_pe(&build_pe(b"payload"), &options);
    let image = PeImage::parse(&signed).unwrap();

    // The certificates have expired by now, but the countersignature
    // proves the signature was made while they were valid.
    let report = AuthenticodeValidator::new(time(AFTER_EXPIRY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(report.status, SignatureStatus::Valid);

    let countersignature = report.countersignature.unwrap();
    assert_eq!(countersignature.status, SignatureStatus::Valid);
    assert_eq!(countersignature.timestamp, Some(IN_VALIDITY));
    let countersigner = countersignature.signer.unwrap();
    assert_eq!(countersigner.subject, "CN=Test Timestamper,O=Acme Corp");
    assert_eq!(countersigner.subject_short_name, "Test Timestamper");
    assert_eq!(countersigner.timestamp, Some(IN_VALIDITY));
}

#[test]
fn test_countersignature_does_not_rescue_primary() {
    let options = SignOptions {
        digest: Some(vec![0; 32]),
        countersign_at: Some(IN_VALIDITY),
    };
    let signed = sign_pe(&build_pe(b"payload"), &options);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::HashMismatch)
    );
    assert!(report.countersignature.unwrap().status.is_valid());
}

#[test]
fn test_multiple_signatures() {
    let pe = build_pe(b"payload");
    let good = authenticode_blob(&sha256_authenticode(&pe), None);
    let bad = authenticode_blob(&[0; 32], None);
    let signed = attach_signatures(&pe, &[&good, &bad]);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(report.signature_count, 2);
    assert_eq!(report.status, SignatureStatus::Valid);
}

#[test]
fn test_garbage_signature() {
    let pe = build_pe(b"payload");
    let signed = attach_signatures(&pe, &[b"this is not DER".as_slice()]);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::Asn1(_))
    ));
    assert!(report.signer.is_none());
}

#[test]
fn test_not_an_authenticode_signature() {
    // A catalog is a well-formed SignedData, but not over an image.
    let pe = build_pe(b"payload");
    let catalog = catalog_file(&trust_list(vec![sha1_member(&[0x11; 20])]));
    let signed = attach_signatures(&pe, &[&catalog]);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(
        report.status,
        SignatureStatus::Invalid(ValidationFailure::NotIndirectData(
            SZ_OID_CTL
        ))
    );
    assert_eq!(
        report.signer.unwrap().subject_short_name,
        "Catalog Signer"
    );
}

#[test]
fn test_unsorted_signed_attributes() {
    let pe = build_pe(b"payload");
    let blob = authenticode_blob_unsorted_attributes(&sha256_authenticode(&pe));
    let signed = attach_signatures(&pe, &[&blob]);
    let image = PeImage::parse(&signed).unwrap();

    let report = AuthenticodeValidator::new(time(IN_VALIDITY))
        .validate(&image)
        .unwrap()
        .unwrap();
    assert_eq!(report.status, SignatureStatus::Valid);
}
