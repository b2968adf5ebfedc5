// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ASN.1 schema of a catalog's certificate trust list.
//!
//! Microsoft does not publish this schema; the shapes below are what
//! catalog files in the wild have been observed to contain. Fields
//! that are not always present are optional and member sets keep
//! their encoded order.

use crate::asn1::LenientSetOf;
use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::Sequence;
use x509_cert::time::Time;

/// `SEQUENCE { OID }` naming the kind of list (`szOID_CATALOG_LIST`).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CatalogIdSequence {
    /// Normally [`SZ_OID_CATALOG_LIST`](crate::SZ_OID_CATALOG_LIST).
    pub oid: ObjectIdentifier,
}

/// `SEQUENCE { OID, parameters }`, usually with `NULL` parameters.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OidSequence {
    /// Algorithm or member type.
    pub oid: ObjectIdentifier,

    /// Parameters; `NULL` in every catalog seen so far.
    #[asn1(optional = "true")]
    pub parameters: Option<Any>,
}

/// Digest of one trusted file.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct HashObject {
    /// Digest algorithm.
    pub algorithm: OidSequence,

    /// Digest bytes.
    pub digest: OctetString,
}

/// Image description plus digest, shaped like `SpcIndirectDataContent`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DataObjectSequence {
    /// `SEQUENCE { SPC_PE_IMAGE_DATA_OBJID, SpcPeImageData }`, kept opaque.
    pub pe_image_data: Any,

    /// The member's digest.
    pub hash_object: HashObject,
}

/// Payload of the indirect-data member attribute.
pub type DataObjectSet = LenientSetOf<DataObjectSequence>;

/// One attribute of a catalog member.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MemberInfo {
    /// Attribute type, e.g. `SPC_INDIRECT_DATA_OBJID`.
    pub oid: ObjectIdentifier,

    /// Attribute value; a [`DataObjectSet`] for indirect data.
    pub value: Any,
}

/// Attributes attached to a catalog member.
pub type CatalogMemberSet = LenientSetOf<MemberInfo>;

/// One entry of the trust list.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CatalogMember {
    /// Member tag; for hashed files this is the digest as UTF-16 hex.
    pub double_encoded: OctetString,

    /// Member attributes.
    #[asn1(optional = "true")]
    pub member_set: Option<CatalogMemberSet>,
}

/// Certificate trust list carried as a catalog's signed content.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertificateTrustList {
    /// Kind of list.
    pub catalog_list_oid: CatalogIdSequence,

    /// List identifier.
    pub digest: OctetString,

    /// When the list was produced.
    pub time: Time,

    /// Member type (`szOID_CATALOG_LIST_MEMBER`).
    pub member_oid: OidSequence,

    /// Members, in encoded order.
    pub catalog_list: Vec<CatalogMember>,

    /// Catalog-level name/value attributes.
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub cat_name_values: Option<Any>,
}
