// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::asn1::{decode_prefix, warn_trailing_data, Asn1Error};
use crate::authenticode_digest::DigestAlgorithm;
use crate::catalog_schema::{CatalogMember, CertificateTrustList, DataObjectSet};
use crate::cert_directory::{cert_info, CertInfo, CertificateDirectory};
use crate::oid::{oid_name, SZ_OID_CTL};
use crate::pkcs7::{parse_signed_data, Pkcs7Error};
use crate::signature::SPC_INDIRECT_DATA_OBJID;
use der::asn1::ObjectIdentifier;
use der::Encode;

/// Error returned by [`decode_catalog`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CatalogError {
    /// The file is not a PKCS#7 `SignedData`.
    #[error("catalog is not signed data: {0}")]
    Pkcs7(#[from] Pkcs7Error),

    /// The signed content is not a certificate trust list.
    #[error("catalog does not have a certificate trust list, content type was {0}")]
    NotATrustList(ObjectIdentifier),

    /// The signed data has no content.
    #[error("catalog has no signed content")]
    EmptyContent,

    /// The certificate trust list is malformed.
    #[error("invalid certificate trust list: {0}")]
    InvalidTrustList(#[from] Asn1Error),
}

/// A digest the catalog vouches for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustListCandidate {
    /// Position of the member in the trust list.
    pub member_index: usize,
    /// Digest algorithm.
    pub algorithm: DigestAlgorithm,
    /// Digest bytes.
    pub digest: Vec<u8>,
}

/// Why a trust list member yielded no digest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The member has no attribute set.
    NoAttributes,
    /// No attribute carries indirect data.
    NoIndirectData,
    /// The indirect data could not be decoded.
    Malformed,
    /// The indirect data lists no hash.
    NoDigest,
    /// The digest algorithm is not SHA-1; holds the algorithm name.
    UnsupportedDigest(String),
}

/// A trust list member that was skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedMember {
    /// Position of the member in the trust list.
    pub member_index: usize,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Result of decoding a catalog file.
#[derive(Clone, Debug)]
pub struct DecodedCatalog {
    /// Identity of the catalog's signer. The catalog's own signature is
    /// not verified.
    pub signer: Option<CertInfo>,
    /// The decoded trust list.
    pub trust_list: CertificateTrustList,
    /// Digests extracted from the trust list, in member order.
    pub entries: Vec<TrustListCandidate>,
    /// Members that yielded no digest, in member order.
    pub skipped: Vec<SkippedMember>,
    /// Number of members in the trust list.
    pub member_count: usize,
}

/// Decode a catalog (`.cat`) file.
///
/// Members that cannot be decoded, or whose digest is not SHA-1, are
/// logged and skipped; only a malformed outer structure is an error.
pub fn decode_catalog(bytes: &[u8]) -> Result<DecodedCatalog, CatalogError> {
    let (signed_data, rest) = parse_signed_data(bytes)?;
    warn_trailing_data("catalog", rest);

    let directory = CertificateDirectory::from_signed_data(&signed_data);
    let signer = signed_data
        .signer_infos
        .0
        .get(0)
        .and_then(|signer_info| cert_info(signer_info, &directory));
    if signer.is_none() {
        tracing::warn!("catalog signer certificate not found");
    }

    let content_info = &signed_data.encap_content_info;
    if content_info.econtent_type != SZ_OID_CTL {
        return Err(CatalogError::NotATrustList(content_info.econtent_type));
    }
    let ctl_bytes = content_info
        .econtent
        .as_ref()
        .ok_or(CatalogError::EmptyContent)?
        .to_der()
        .map_err(Asn1Error::from)?;

    let (trust_list, rest) = decode_prefix::<CertificateTrustList>(&ctl_bytes)?;
    warn_trailing_data("certificate trust list", rest);

    let member_count = trust_list.catalog_list.len();
    tracing::info!(member_count, "decoded certificate trust list");

    let mut entries = Vec::with_capacity(member_count);
    let mut skipped = Vec::new();
    for (index, member) in trust_list.catalog_list.iter().enumerate() {
        match member_entry(index, member) {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                tracing::warn!(
                    member = index,
                    ?reason,
                    "skipping trust list member"
                );
                skipped.push(SkippedMember {
                    member_index: index,
                    reason,
                });
            }
        }
    }

    if !skipped.is_empty() {
        tracing::warn!(
            found = entries.len(),
            member_count,
            "not every trust list member yielded a digest"
        );
    }

    Ok(DecodedCatalog {
        signer,
        trust_list,
        entries,
        skipped,
        member_count,
    })
}

/// Digest carried by the indirect-data attribute of one member.
fn member_entry(
    index: usize,
    member: &CatalogMember,
) -> Result<TrustListCandidate, SkipReason> {
    let indirect = member
        .member_set
        .as_ref()
        .ok_or(SkipReason::NoAttributes)?
        .iter()
        .find(|info| info.oid == SPC_INDIRECT_DATA_OBJID)
        .ok_or(SkipReason::NoIndirectData)?;

    let value = indirect.value.to_der().map_err(|err| {
        tracing::debug!(member = index, "cannot re-encode member: {err}");
        SkipReason::Malformed
    })?;
    let (data_objects, rest) =
        decode_prefix::<DataObjectSet>(&value).map_err(|err| {
            tracing::debug!(member = index, "cannot decode member: {err}");
            SkipReason::Malformed
        })?;
    if !rest.is_empty() {
        tracing::warn!(
            member = index,
            trailing = rest.len(),
            "trailing data in member"
        );
    }

    let hash_object = &data_objects
        .iter()
        .next()
        .ok_or(SkipReason::NoDigest)?
        .hash_object;
    let algorithm_name = oid_name(&hash_object.algorithm.oid);
    if algorithm_name != DigestAlgorithm::Sha1.name() {
        return Err(SkipReason::UnsupportedDigest(algorithm_name));
    }

    Ok(TrustListCandidate {
        member_index: index,
        algorithm: DigestAlgorithm::Sha1,
        digest: hash_object.digest.as_bytes().to_vec(),
    })
}
