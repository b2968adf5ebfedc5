// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::asn1::{first_signer_info, signed_attributes_der};
use crate::pkcs7::{parse_signed_data, Pkcs7Error};
use cms::cert::CertificateChoices;
use cms::signed_data::{SignedData, SignerInfo};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Any, Sequence};
use x509_cert::Certificate;

/// Content type of an authenticode signature's encapsulated content.
pub const SPC_INDIRECT_DATA_OBJID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.2.1.4");

/// Encapsulated content of an authenticode signature: what was hashed
/// and the resulting image digest.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SpcIndirectDataContent {
    /// Description of the hashed object (`SpcPeImageData` for PE files).
    pub data: SpcAttributeTypeAndOptionalValue,

    /// Image digest.
    pub message_digest: DigestInfo,
}

/// Type-tagged opaque value.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SpcAttributeTypeAndOptionalValue {
    #[allow(missing_docs)]
    pub value_type: ObjectIdentifier,

    #[allow(missing_docs)]
    pub value: Any,
}

/// Digest algorithm and value.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DigestInfo {
    #[allow(missing_docs)]
    pub digest_algorithm: spki::AlgorithmIdentifierOwned,

    #[allow(missing_docs)]
    pub digest: OctetString,
}

/// A PKCS#7 `SignedData` read from an attribute certificate.
///
/// Only the PKCS#7 envelope is checked here. Whether it has the shape
/// of an authenticode signature, and whether it verifies, is decided by
/// [`AuthenticodeValidator`](crate::AuthenticodeValidator).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthenticodeSignature {
    signed_data: SignedData,
    signed_attributes: Option<Vec<u8>>,
}

impl AuthenticodeSignature {
    /// Parse a DER `ContentInfo`, returning the signature and any bytes
    /// that followed it.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), Pkcs7Error> {
        let (signed_data, rest) = parse_signed_data(bytes)?;
        let signed_attributes =
            first_signer_info(bytes).and_then(signed_attributes_der);
        Ok((
            Self {
                signed_data,
                signed_attributes,
            },
            rest,
        ))
    }

    /// The decoded `SignedData`.
    pub fn signed_data(&self) -> &SignedData {
        &self.signed_data
    }

    /// The first signer info. Parsing guarantees there is one.
    pub fn signer_info(&self) -> Option<&SignerInfo> {
        self.signed_data.signer_infos.0.get(0)
    }

    /// The first signer's signed attributes as encoded in the blob,
    /// tagged as the `SET OF` its signature covers.
    pub fn signed_attributes_der(&self) -> Option<&[u8]> {
        self.signed_attributes.as_deref()
    }

    /// The encapsulated content, if present.
    pub fn encapsulated_content(&self) -> Option<&Any> {
        self.signed_data.encap_content_info.econtent.as_ref()
    }

    /// Embedded X.509 certificates.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert),
                CertificateChoices::Other(_) => None,
            })
    }
}
