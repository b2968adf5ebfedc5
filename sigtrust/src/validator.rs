// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Authenticode signature validation.
//!
//! Each signature goes through the same linear sequence of checks and
//! stops at the first failure:
//!
//! 1. the blob decodes as a PKCS#7 `SignedData`;
//! 2. it has the authenticode shape: `SpcIndirectDataContent` content,
//!    one signer whose digest algorithm matches the content's, and
//!    `contentType` and `messageDigest` signed attributes;
//! 3. the signer's digest algorithm is supported;
//! 4. the embedded image digest matches the computed one;
//! 5. the signer's signature verifies against its certificate;
//! 6. the signer's certificate is valid at the signing time.
//!
//! Signer identity is extracted whenever the `SignedData` decodes, even
//! if a later check fails. A PKCS#9 countersignature is checked the
//! same way against the primary signature value; its outcome never
//! changes the primary status.

use crate::asn1::{signed_attributes_der, warn_trailing_data};
use crate::authenticode_digest::{authenticode_digest, DigestAlgorithm};
use crate::cert_directory::{cert_info, CertInfo, CertificateDirectory};
use crate::pe::{PeOffsetError, PeTrait};
use crate::pkcs7::Pkcs7Error;
use crate::signature::{
    AuthenticodeSignature, SpcIndirectDataContent, SPC_INDIRECT_DATA_OBJID,
};
use crate::verify::{verify_signature, SignatureError};
use crate::win_cert::{extract_signatures, AttributeCertificateError};
use cms::signed_data::SignerInfo;
use const_oid::db::rfc5911::{
    ID_CONTENT_TYPE, ID_COUNTERSIGNATURE, ID_MESSAGE_DIGEST, ID_SIGNING_TIME,
};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Any, Decode, Encode};
use std::time::{SystemTime, UNIX_EPOCH};
use x509_cert::time::Time;
use x509_cert::Certificate;

/// Reason a signature is not valid.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    /// The signature blob is not a well-formed PKCS#7 `SignedData`.
    #[error("malformed signature: {0}")]
    Asn1(Pkcs7Error),

    /// The encapsulated content is not `SpcIndirectDataContent`.
    #[error("encapsulated content type is {0}, not SpcIndirectData")]
    NotIndirectData(ObjectIdentifier),

    /// The encapsulated content is absent.
    #[error("encapsulated content is empty")]
    MissingIndirectData,

    /// The encapsulated content does not decode.
    #[error("invalid SpcIndirectDataContent: {0}")]
    InvalidIndirectData(der::Error),

    /// There is not exactly one signer info.
    #[error("expected one signer info, found {0}")]
    SignerCount(usize),

    /// The signer's digest algorithm differs from the image digest's.
    #[error("signer digest algorithm does not match the image digest")]
    AlgorithmMismatch,

    /// A required signed attribute is absent.
    #[error("missing signed attribute {0}")]
    MissingSignedAttribute(ObjectIdentifier),

    /// The countersignature attribute is not a valid `SignerInfo`.
    #[error("malformed countersignature: {0}")]
    InvalidCountersignature(der::Error),

    /// The signer's digest algorithm is not supported.
    #[error("unsupported digest algorithm {0}")]
    UnsupportedDigestAlgorithm(ObjectIdentifier),

    /// The image offsets needed for hashing are invalid.
    #[error("cannot hash image: {0}")]
    InvalidImage(PeOffsetError),

    /// The digest embedded in the signature does not match the image.
    #[error("authenticode digest does not match the image")]
    HashMismatch,

    /// The `messageDigest` attribute does not match the signed content.
    #[error("messageDigest attribute does not match the signed content")]
    MessageDigestMismatch,

    /// The signer's certificate is not among the embedded certificates.
    #[error("signer certificate not found")]
    MissingSignerCertificate,

    /// The signature does not verify.
    #[error("signature is invalid: {0}")]
    SignatureInvalid(SignatureError),

    /// The signer's certificate is not valid at the checked time.
    #[error("certificate valid from {not_before} to {not_after}, checked at {checked_at}")]
    ChainInvalid {
        /// Start of the validity period, seconds since the Unix epoch.
        not_before: u64,
        /// End of the validity period, seconds since the Unix epoch.
        not_after: u64,
        /// Time that was checked, seconds since the Unix epoch.
        checked_at: u64,
    },
}

/// Terminal state of one signature check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignatureStatus {
    /// Every check passed.
    Valid,
    /// A check failed.
    Invalid(ValidationFailure),
}

impl SignatureStatus {
    /// Whether every check passed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    fn from_result(result: Result<(), ValidationFailure>) -> Self {
        match result {
            Ok(()) => Self::Valid,
            Err(failure) => Self::Invalid(failure),
        }
    }
}

/// Outcome of checking a countersignature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountersignatureReport {
    /// Countersignature status.
    pub status: SignatureStatus,
    /// Signing time, seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    /// Countersigner identity, with `timestamp` filled in.
    pub signer: Option<CertInfo>,
}

/// Outcome of validating the signature embedded in an image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationReport {
    /// Primary signature status.
    pub status: SignatureStatus,
    /// Primary signer identity, if its certificate was found.
    pub signer: Option<CertInfo>,
    /// Countersignature outcome, if one is present.
    pub countersignature: Option<CountersignatureReport>,
    /// Number of signature blobs in the image. Only the first is
    /// validated.
    pub signature_count: usize,
}

/// Validates authenticode signatures.
pub struct AuthenticodeValidator {
    now: SystemTime,
}

impl AuthenticodeValidator {
    /// Create a validator that checks certificate validity at `now`
    /// when no trusted signing time is available.
    pub fn new(now: SystemTime) -> Self {
        Self { now }
    }

    /// Validate the first signature embedded in `pe`.
    ///
    /// Returns `Ok(None)` when the image is unsigned.
    pub fn validate(
        &self,
        pe: &dyn PeTrait,
    ) -> Result<Option<ValidationReport>, AttributeCertificateError> {
        let Some(blobs) = extract_signatures(pe)? else {
            return Ok(None);
        };
        if blobs.len() > 1 {
            tracing::warn!(
                count = blobs.len(),
                "multiple signatures present, only validating the first"
            );
        }
        let Some(first) = blobs.first() else {
            return Ok(None);
        };

        let mut report = self.validate_blob(pe, first);
        report.signature_count = blobs.len();
        Ok(Some(report))
    }

    /// Validate one DER signature blob against `pe`.
    pub fn validate_blob(
        &self,
        pe: &dyn PeTrait,
        blob: &[u8],
    ) -> ValidationReport {
        let mut report = ValidationReport {
            status: SignatureStatus::Valid,
            signer: None,
            countersignature: None,
            signature_count: 1,
        };

        let (signature, rest) = match AuthenticodeSignature::parse(blob) {
            Ok(parsed) => parsed,
            Err(err) => {
                report.status =
                    SignatureStatus::Invalid(ValidationFailure::Asn1(err));
                return report;
            }
        };
        // Attribute certificates are padded to eight bytes.
        if rest.iter().any(|b| *b != 0) {
            warn_trailing_data("signature", rest);
        }

        let directory =
            CertificateDirectory::from_signed_data(signature.signed_data());
        let Some(signer_info) = signature.signer_info() else {
            return report;
        };
        report.signer = cert_info(signer_info, &directory);
        if report.signer.is_none() {
            tracing::warn!("signer certificate not found, skipping identity");
        }

        report.countersignature = self.check_countersignature(
            signer_info,
            &directory,
        );

        let signing_time = report
            .countersignature
            .as_ref()
            .filter(|cs| cs.status.is_valid())
            .and_then(|cs| cs.timestamp);

        report.status = SignatureStatus::from_result(self.check_primary(
            pe,
            &signature,
            &directory,
            signing_time,
        ));
        report
    }

    fn check_primary(
        &self,
        pe: &dyn PeTrait,
        signature: &AuthenticodeSignature,
        directory: &CertificateDirectory<'_>,
        signing_time: Option<u64>,
    ) -> Result<(), ValidationFailure> {
        let (indirect_data, signer_info) = check_structure(signature)?;

        let algorithm = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid)
            .ok_or(ValidationFailure::UnsupportedDigestAlgorithm(
                signer_info.digest_alg.oid,
            ))?;
        let computed = algorithm
            .compute(|hasher| authenticode_digest(pe, hasher))
            .map_err(ValidationFailure::InvalidImage)?;
        if computed != indirect_data.message_digest.digest.as_bytes() {
            return Err(ValidationFailure::HashMismatch);
        }

        let certificate = directory
            .signer_certificate(&signer_info.sid)
            .ok_or(ValidationFailure::MissingSignerCertificate)?;
        let content = signature
            .encapsulated_content()
            .map(|content| content.value())
            .unwrap_or_default();
        verify_signer_info(
            signer_info,
            signature.signed_attributes_der(),
            certificate,
            algorithm,
            content,
        )?;

        let checked_at = signing_time.unwrap_or_else(|| unix_seconds(self.now));
        check_validity(certificate, checked_at)
    }

    fn check_countersignature(
        &self,
        signer_info: &SignerInfo,
        directory: &CertificateDirectory<'_>,
    ) -> Option<CountersignatureReport> {
        let value = signer_info
            .unsigned_attrs
            .as_ref()?
            .iter()
            .find(|attr| attr.oid == ID_COUNTERSIGNATURE)?
            .values
            .get(0)?;

        let countersigner = match value.decode_as::<SignerInfo>() {
            Ok(countersigner) => countersigner,
            Err(err) => {
                return Some(CountersignatureReport {
                    status: SignatureStatus::Invalid(
                        ValidationFailure::InvalidCountersignature(err),
                    ),
                    timestamp: None,
                    signer: None,
                });
            }
        };

        let timestamp = signed_attribute(&countersigner, ID_SIGNING_TIME)
            .and_then(|time| time.to_der().ok())
            .and_then(|der| Time::from_der(&der).ok())
            .map(|time| time.to_unix_duration().as_secs());

        let signer = cert_info(&countersigner, directory).map(|mut info| {
            info.timestamp = timestamp;
            info
        });

        let status = SignatureStatus::from_result(self.check_countersigner(
            &countersigner,
            signed_attributes_der(value.value()),
            signer_info,
            directory,
            timestamp,
        ));

        Some(CountersignatureReport {
            status,
            timestamp,
            signer,
        })
    }

    fn check_countersigner(
        &self,
        countersigner: &SignerInfo,
        signed_attributes: Option<Vec<u8>>,
        signer_info: &SignerInfo,
        directory: &CertificateDirectory<'_>,
        timestamp: Option<u64>,
    ) -> Result<(), ValidationFailure> {
        let algorithm = DigestAlgorithm::from_oid(&countersigner.digest_alg.oid)
            .ok_or(ValidationFailure::UnsupportedDigestAlgorithm(
                countersigner.digest_alg.oid,
            ))?;
        let certificate = directory
            .signer_certificate(&countersigner.sid)
            .ok_or(ValidationFailure::MissingSignerCertificate)?;
        // A countersignature signs the primary signature value.
        verify_signer_info(
            countersigner,
            signed_attributes.as_deref(),
            certificate,
            algorithm,
            signer_info.signature.as_bytes(),
        )?;
        let checked_at = timestamp.unwrap_or_else(|| unix_seconds(self.now));
        check_validity(certificate, checked_at)
    }
}

/// Check that `signature` has the shape of an authenticode signature and
/// return its image digest and signer.
fn check_structure(
    signature: &AuthenticodeSignature,
) -> Result<(SpcIndirectDataContent, &SignerInfo), ValidationFailure> {
    let signed_data = signature.signed_data();
    let content_type = signed_data.encap_content_info.econtent_type;
    if content_type != SPC_INDIRECT_DATA_OBJID {
        return Err(ValidationFailure::NotIndirectData(content_type));
    }
    let indirect_data = signature
        .encapsulated_content()
        .ok_or(ValidationFailure::MissingIndirectData)?
        .decode_as::<SpcIndirectDataContent>()
        .map_err(ValidationFailure::InvalidIndirectData)?;

    let [signer_info] = signed_data.signer_infos.0.as_slice() else {
        return Err(ValidationFailure::SignerCount(
            signed_data.signer_infos.0.len(),
        ));
    };
    if signer_info.digest_alg.oid
        != indirect_data.message_digest.digest_algorithm.oid
    {
        return Err(ValidationFailure::AlgorithmMismatch);
    }
    for oid in [ID_CONTENT_TYPE, ID_MESSAGE_DIGEST] {
        if signed_attribute(signer_info, oid).is_none() {
            return Err(ValidationFailure::MissingSignedAttribute(oid));
        }
    }
    Ok((indirect_data, signer_info))
}

fn signed_attribute(
    signer_info: &SignerInfo,
    oid: ObjectIdentifier,
) -> Option<&Any> {
    signer_info
        .signed_attrs
        .as_ref()?
        .iter()
        .find(|attr| attr.oid == oid)?
        .values
        .get(0)
}

/// Check `signer_info`'s signature over `content`.
///
/// With signed attributes, the `messageDigest` attribute must match
/// `content` and the signature covers the attributes as a `SET OF`.
/// `encoded_attributes` are those bytes as they appeared in the blob;
/// re-encoding is the fallback when they could not be located.
/// Without signed attributes, the signature covers `content` directly.
fn verify_signer_info(
    signer_info: &SignerInfo,
    encoded_attributes: Option<&[u8]>,
    certificate: &Certificate,
    algorithm: DigestAlgorithm,
    content: &[u8],
) -> Result<(), ValidationFailure> {
    let signed = match &signer_info.signed_attrs {
        Some(attrs) => {
            let message_digest = signed_attribute(signer_info, ID_MESSAGE_DIGEST)
                .and_then(|value| value.decode_as::<OctetString>().ok())
                .ok_or(ValidationFailure::MessageDigestMismatch)?;
            if message_digest.as_bytes() != algorithm.digest(content) {
                return Err(ValidationFailure::MessageDigestMismatch);
            }
            match encoded_attributes {
                Some(encoded) => encoded.to_vec(),
                None => attrs.to_der().map_err(|_| {
                    ValidationFailure::SignatureInvalid(SignatureError::Mismatch)
                })?,
            }
        }
        None => content.to_vec(),
    };

    verify_signature(
        &certificate.tbs_certificate.subject_public_key_info,
        Some(&signer_info.digest_alg.oid),
        &signer_info.signature_algorithm.oid,
        signer_info.signature.as_bytes(),
        &signed,
    )
    .map_err(ValidationFailure::SignatureInvalid)
}

fn check_validity(
    certificate: &Certificate,
    checked_at: u64,
) -> Result<(), ValidationFailure> {
    let validity = &certificate.tbs_certificate.validity;
    let not_before = validity.not_before.to_unix_duration().as_secs();
    let not_after = validity.not_after.to_unix_duration().as_secs();
    if (not_before..=not_after).contains(&checked_at) {
        Ok(())
    } else {
        Err(ValidationFailure::ChainInvalid {
            not_before,
            not_after,
            checked_at,
        })
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
