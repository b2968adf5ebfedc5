// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use der::asn1::ObjectIdentifier;
use sigtrust::{
    AnalysisError, Asn1Error, AttributeCertificateAuthenticodeError,
    AttributeCertificateError, CatalogError, CatalogId, FileId,
    NotPecoffError, PeImage, PeOffsetError, Pkcs7Error, SignatureError,
    StorageError, StoreError, TrustListEntryId, ValidationFailure,
    VersionInfoError,
};

// Don't check the actual messages, just validate that formatting without
// panic or error.

fn der_err() -> der::Error {
    der::Error::new(der::ErrorKind::Failed, der::Length::ZERO)
}

fn oid() -> ObjectIdentifier {
    ObjectIdentifier::new_unwrap("1.2.3")
}

fn object_err() -> object::read::Error {
    match PeImage::parse(&[]) {
        Err(NotPecoffError(err)) => err,
        Ok(_) => panic!("empty input parsed as PE"),
    }
}

#[test]
fn test_attribute_certificate_authenticode_error() {
    format!(
        "{}",
        AttributeCertificateAuthenticodeError::InvalidCertificateRevision(0)
    );
    format!(
        "{}",
        AttributeCertificateAuthenticodeError::InvalidCertificateType(0)
    );
    format!(
        "{}",
        AttributeCertificateAuthenticodeError::InvalidSignature(
            Pkcs7Error::NoSignerInfo
        )
    );
}

#[test]
fn test_attribute_certificate_error() {
    format!("{}", AttributeCertificateError::InvalidSize);
    format!("{}", AttributeCertificateError::OutOfBounds);
}

#[test]
fn test_asn1_errors() {
    format!("{}", Asn1Error::Empty);
    format!("{}", Asn1Error::Structural(der_err()));
    format!("{}", Pkcs7Error::InvalidContentInfo(Asn1Error::Empty));
    format!("{}", Pkcs7Error::NotSignedData(oid()));
    format!("{}", Pkcs7Error::InvalidSignedData(der_err()));
    format!("{}", Pkcs7Error::NoSignerInfo);
}

#[test]
fn test_pe_errors() {
    format!("{}", PeOffsetError);
    format!("{}", NotPecoffError(object_err()));
    format!("{}", VersionInfoError::Resource(object_err()));
    format!("{}", VersionInfoError::Truncated { offset: 12 });
    format!("{}", VersionInfoError::UnexpectedRoot("x".to_owned()));
}

#[test]
fn test_validation_failure() {
    format!("{}", ValidationFailure::Asn1(Pkcs7Error::NoSignerInfo));
    format!("{}", ValidationFailure::NotIndirectData(oid()));
    format!("{}", ValidationFailure::MissingIndirectData);
    format!("{}", ValidationFailure::InvalidIndirectData(der_err()));
    format!("{}", ValidationFailure::SignerCount(2));
    format!("{}", ValidationFailure::AlgorithmMismatch);
    format!("{}", ValidationFailure::MissingSignedAttribute(oid()));
    format!("{}", ValidationFailure::InvalidCountersignature(der_err()));
    format!("{}", ValidationFailure::UnsupportedDigestAlgorithm(oid()));
    format!("{}", ValidationFailure::InvalidImage(PeOffsetError));
    format!("{}", ValidationFailure::HashMismatch);
    format!("{}", ValidationFailure::MessageDigestMismatch);
    format!("{}", ValidationFailure::MissingSignerCertificate);
    format!(
        "{}",
        ValidationFailure::SignatureInvalid(SignatureError::Mismatch)
    );
    format!(
        "{}",
        ValidationFailure::ChainInvalid {
            not_before: 1,
            not_after: 2,
            checked_at: 3,
        }
    );

    format!(
        "{}",
        SignatureError::UnsupportedAlgorithm {
            digest: None,
            signature: oid(),
        }
    );
    format!("{}", SignatureError::InvalidPublicKey);
    format!("{}", SignatureError::MalformedSignature);
}

#[test]
fn test_catalog_error() {
    format!("{}", CatalogError::Pkcs7(Pkcs7Error::NoSignerInfo));
    format!("{}", CatalogError::NotATrustList(oid()));
    format!("{}", CatalogError::EmptyContent);
    format!("{}", CatalogError::InvalidTrustList(Asn1Error::Empty));
}

#[test]
fn test_store_and_analysis_errors() {
    format!("{}", StoreError::UnknownFile(FileId(1)));
    format!("{}", StoreError::UnknownCatalog(CatalogId(1)));
    format!("{}", StoreError::UnknownTrustListEntry(TrustListEntryId(1)));
    format!("{}", StoreError::Poisoned);
    format!("{}", StoreError::Backend("down".to_owned()));

    format!("{}", StorageError::NotFound("00/00/00".to_owned()));
    format!(
        "{}",
        StorageError::Io {
            path: "00/00/00".to_owned(),
            source: std::io::Error::other("boom"),
        }
    );
    format!("{}", StorageError::Poisoned);

    format!("{}", AnalysisError::UnknownFile(FileId(1)));
    format!("{}", AnalysisError::UnknownCatalog(CatalogId(1)));
    format!(
        "{}",
        AnalysisError::SizeMismatch {
            expected: 1,
            actual: 2,
        }
    );
    format!("{}", AnalysisError::Storage(StorageError::Poisoned));
    format!("{}", AnalysisError::Store(StoreError::Poisoned));
    format!(
        "{}",
        AnalysisError::CertificateTable(AttributeCertificateError::InvalidSize)
    );
    format!("{}", AnalysisError::Catalog(CatalogError::EmptyContent));
}
