// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Code-signing trust for Windows executables and catalog files.
//!
//! The crate hashes PE images the way Authenticode does, extracts and
//! validates embedded PKCS#7 signatures, decodes signed catalog
//! (`.cat`) trust lists, and reconciles catalog entries against known
//! files through an abstract [`Store`].
//!
//! References:
//! - <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format>
//! - <https://download.microsoft.com/download/9/c/5/9c5b2167-8017-4bae-9fde-d599bac8184a/authenticode_pe.docx>

#![forbid(unsafe_code)]
#![warn(clippy::arithmetic_side_effects)]
#![warn(missing_docs)]

mod analysis;
mod asn1;
mod authenticode_digest;
mod catalog;
mod catalog_schema;
mod cert_directory;
mod oid;
mod pe;
mod pe_object;
mod pkcs7;
mod reconcile;
mod signature;
mod store;
mod validator;
mod verify;
mod version_info;
mod win_cert;

use core::convert::TryInto;

pub use analysis::{
    analyze_catalog, analyze_executable, run_task, AnalysisContext,
    AnalysisError, CatalogReport, CatalogTask, ExecutableReport, FileTask,
    Task, TaskKind, TaskOutcome,
};
pub use asn1::{decode_prefix, Asn1Error, LenientSetOf};
pub use authenticode_digest::{
    authenticode_digest, DigestAlgorithm, DigestKind, DigestSet, MultiHasher,
};
pub use catalog::{
    decode_catalog, CatalogError, DecodedCatalog, SkipReason, SkippedMember,
    TrustListCandidate,
};
pub use catalog_schema::{
    CatalogIdSequence, CatalogMember, CatalogMemberSet, CertificateTrustList,
    DataObjectSequence, DataObjectSet, HashObject, MemberInfo, OidSequence,
};
pub use cert_directory::{
    cert_info, CertInfo, CertificateDirectory, CertificateKey,
    DistinguishedName,
};
pub use oid::{
    oid_name, CAT_MEMBERINFO_OBJID, SPC_PE_IMAGE_DATA_OBJID,
    SZ_OID_CATALOG_LIST, SZ_OID_CATALOG_LIST_MEMBER, SZ_OID_CTL,
};
pub use pe::{PeOffsetError, PeOffsets, PeTrait};
pub use pe_object::{NotPecoffError, PeImage};
pub use pkcs7::{parse_signed_data, Pkcs7Error};
pub use reconcile::{ReconcileSummary, TrustReconciler};
pub use signature::{
    AuthenticodeSignature, DigestInfo,
    SpcAttributeTypeAndOptionalValue, SpcIndirectDataContent,
    SPC_INDIRECT_DATA_OBJID,
};
pub use store::{
    object_path, CatalogId, Clock, FileId, FixedClock, FsObjectStore,
    MemoryObjectStore, MemoryStore, ObjectStore, SignerId, StorageError,
    Store, StoreError, StoredObject, SystemClock, TrustListEntry,
    TrustListEntryId, TrustListMatch, Upserted,
};
pub use validator::{
    AuthenticodeValidator, CountersignatureReport, SignatureStatus,
    ValidationFailure, ValidationReport,
};
pub use verify::SignatureError;
pub use version_info::{PeInfo, VersionInfoError};
pub use win_cert::{
    extract_signatures, AttributeCertificate,
    AttributeCertificateAuthenticodeError, AttributeCertificateError,
    AttributeCertificateIterator, WIN_CERT_REVISION_2_0,
    WIN_CERT_TYPE_PKCS_SIGNED_DATA,
};

/// Convert a `u32` to a `usize`, saturating if the value does not fit.
///
/// Saturation can only happen on targets where `usize` is smaller than
/// 32 bits; any offset computed from it then fails bounds checks instead
/// of panicking.
fn usize_from_u32(val: u32) -> usize {
    val.try_into().unwrap_or(usize::MAX)
}
