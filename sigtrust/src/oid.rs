// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use const_oid::db::{rfc4519, rfc5912};
use const_oid::ObjectIdentifier;

/// `SPC_PE_IMAGE_DATAOBJ`, the value type of a PE image's
/// `SpcAttributeTypeAndOptionalValue`.
pub const SPC_PE_IMAGE_DATA_OBJID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.2.1.15");

/// `szOID_CTL`, the content type of a catalog's `SignedData`.
pub const SZ_OID_CTL: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.1");

/// `szOID_CATALOG_LIST`, the list identifier of a catalog trust list.
pub const SZ_OID_CATALOG_LIST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.1.1");

/// `szOID_CATALOG_LIST_MEMBER`, the member type of a catalog trust list.
pub const SZ_OID_CATALOG_LIST_MEMBER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.1.2");

/// `CAT_MEMBERINFO_OBJID`, a member attribute naming the subject GUID.
pub const CAT_MEMBERINFO_OBJID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.12.2.2");

/// `SPC_INDIRECT_DATA_OBJID` under its CMS name.
const SPC_INDIRECT_DATA: ObjectIdentifier = crate::SPC_INDIRECT_DATA_OBJID;

/// Names for the OIDs that show up in signer and catalog data.
const NAMES: &[(ObjectIdentifier, &str)] = &[
    (rfc5912::ID_MD_5, "md5"),
    (rfc5912::ID_SHA_1, "sha1"),
    (rfc5912::ID_SHA_256, "sha256"),
    (rfc5912::ID_SHA_384, "sha384"),
    (rfc5912::ID_SHA_512, "sha512"),
    (rfc5912::RSA_ENCRYPTION, "rsaEncryption"),
    (rfc5912::MD_5_WITH_RSA_ENCRYPTION, "md5WithRSAEncryption"),
    (rfc5912::SHA_1_WITH_RSA_ENCRYPTION, "sha1WithRSAEncryption"),
    (rfc5912::SHA_256_WITH_RSA_ENCRYPTION, "sha256WithRSAEncryption"),
    (rfc5912::SHA_384_WITH_RSA_ENCRYPTION, "sha384WithRSAEncryption"),
    (rfc5912::SHA_512_WITH_RSA_ENCRYPTION, "sha512WithRSAEncryption"),
    (rfc5912::ID_DSA, "dsa"),
    (rfc5912::ID_EC_PUBLIC_KEY, "ecPublicKey"),
    (rfc5912::ECDSA_WITH_SHA_256, "ecdsa-with-SHA256"),
    (rfc5912::ECDSA_WITH_SHA_384, "ecdsa-with-SHA384"),
    (rfc5912::ECDSA_WITH_SHA_512, "ecdsa-with-SHA512"),
    (SPC_INDIRECT_DATA, "spcIndirectData"),
    (SPC_PE_IMAGE_DATA_OBJID, "spcPeImageData"),
    (SZ_OID_CTL, "certTrustList"),
    (SZ_OID_CATALOG_LIST, "catalogList"),
    (SZ_OID_CATALOG_LIST_MEMBER, "catalogListMember"),
    (CAT_MEMBERINFO_OBJID, "catMemberInfo"),
];

/// Resolve an OID to its short name.
///
/// Unknown OIDs resolve to their dotted-decimal form and log a warning.
pub fn oid_name(oid: &ObjectIdentifier) -> String {
    match NAMES.iter().find(|(known, _)| known == oid) {
        Some((_, name)) => (*name).to_owned(),
        None => {
            tracing::warn!(%oid, "unknown OID");
            oid.to_string()
        }
    }
}

// Distinguished-name attribute types, in display order.
pub(crate) const DN_ORDER: [(&str, ObjectIdentifier); 9] = [
    ("CN", rfc4519::CN),
    ("L", rfc4519::L),
    ("ST", rfc4519::ST),
    ("O", rfc4519::O),
    ("OU", rfc4519::OU),
    ("C", rfc4519::C),
    ("STREET", rfc4519::STREET),
    ("DC", rfc4519::DOMAIN_COMPONENT),
    ("UID", rfc4519::USER_ID),
];
