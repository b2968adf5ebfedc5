// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Task-level entry points.
//!
//! One call analyzes one executable or one catalog to completion. Every
//! dependency arrives through [`AnalysisContext`], so independent calls
//! may run concurrently on separate threads.

use crate::authenticode_digest::{DigestKind, DigestSet};
use crate::catalog::{decode_catalog, CatalogError};
use crate::cert_directory::CertInfo;
use crate::pe_object::PeImage;
use crate::reconcile::{ReconcileSummary, TrustReconciler};
use crate::store::{
    CatalogId, Clock, FileId, ObjectStore, SignerId, StorageError, Store,
    StoreError, StoredObject,
};
use crate::validator::{AuthenticodeValidator, SignatureStatus, ValidationReport};
use crate::version_info::PeInfo;
use crate::win_cert::AttributeCertificateError;
use core::fmt::{self, Display, Formatter};
use serde::Deserialize;

/// Collaborators used by an analysis call.
#[derive(Clone, Copy)]
pub struct AnalysisContext<'a> {
    /// Where file contents are fetched from.
    pub objects: &'a dyn ObjectStore,
    /// Where results are recorded.
    pub store: &'a dyn Store,
    /// Time used for certificate validity and bookkeeping.
    pub clock: &'a dyn Clock,
}

/// Error that aborts one task.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// No executable with this id.
    #[error("file {0} not found in the store")]
    UnknownFile(FileId),

    /// No catalog with this id.
    #[error("catalog {0} not found in the store")]
    UnknownCatalog(CatalogId),

    /// The fetched content does not have the recorded size.
    #[error("file sizes did not match ({actual} != {expected})")]
    SizeMismatch {
        /// Size recorded in the store.
        expected: u64,
        /// Size of the fetched content.
        actual: u64,
    },

    /// Fetching the content failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Reading or writing records failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The attribute certificate table is malformed.
    #[error("invalid certificate table: {0}")]
    CertificateTable(#[from] AttributeCertificateError),

    /// The catalog could not be decoded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Request to analyze an executable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub struct FileTask {
    /// Executable to analyze.
    #[serde(rename = "FileID")]
    pub file_id: FileId,
}

/// Request to analyze a catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub struct CatalogTask {
    /// Catalog to analyze.
    #[serde(rename = "CatalogID")]
    pub catalog_id: CatalogId,
}

/// Which queue a task body came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    /// Executable analysis.
    File,
    /// Catalog analysis.
    Catalog,
}

/// A decoded task request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Task {
    /// Analyze an executable.
    File(FileTask),
    /// Analyze a catalog.
    Catalog(CatalogTask),
}

impl Task {
    /// Decode a JSON task body. Unknown fields are ignored; a missing
    /// id is an error.
    pub fn from_json(kind: TaskKind, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            TaskKind::File => Self::File(serde_json::from_slice(body)?),
            TaskKind::Catalog => Self::Catalog(serde_json::from_slice(body)?),
        })
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(task) => write!(f, "file {}", task.file_id),
            Self::Catalog(task) => write!(f, "catalog {}", task.catalog_id),
        }
    }
}

/// Result of [`analyze_executable`].
#[derive(Clone, Debug)]
pub struct ExecutableReport {
    /// Analyzed executable.
    pub file: FileId,
    /// Whole-file digests.
    pub generic: DigestSet,
    /// Authenticode digests; `None` when the file is not a PE image.
    pub authenticode: Option<DigestSet>,
    /// Version information; `None` when the file is not a PE image.
    pub pe_info: Option<PeInfo>,
    /// Signature validation; `None` when unsigned or not a PE image.
    pub validation: Option<ValidationReport>,
    /// Recorded primary signer; only set for a valid signature.
    pub signer: Option<SignerId>,
    /// Recorded countersigner; only set for a valid countersignature.
    pub countersigner: Option<SignerId>,
    /// Catalog matches found for this file.
    pub reconcile: ReconcileSummary,
}

/// Result of [`analyze_catalog`].
#[derive(Clone, Debug)]
pub struct CatalogReport {
    /// Analyzed catalog.
    pub catalog: CatalogId,
    /// Catalog signer identity.
    pub signer: Option<CertInfo>,
    /// Recorded catalog signer.
    pub signer_id: Option<SignerId>,
    /// Number of members in the trust list.
    pub member_count: usize,
    /// Number of members that yielded a digest.
    pub entry_count: usize,
    /// Entries recorded and files matched.
    pub reconcile: ReconcileSummary,
}

/// Outcome of [`run_task`].
#[derive(Debug)]
pub enum TaskOutcome {
    /// An executable was analyzed.
    Executable(ExecutableReport),
    /// A catalog was analyzed.
    Catalog(CatalogReport),
    /// The task failed; the failure has been logged.
    Failed(AnalysisError),
}

fn fetch_checked(
    objects: &dyn ObjectStore,
    object: &StoredObject,
) -> Result<Vec<u8>, AnalysisError> {
    let bytes = objects.fetch(&object.sha256)?;
    let actual = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if actual != object.size {
        return Err(AnalysisError::SizeMismatch {
            expected: object.size,
            actual,
        });
    }
    Ok(bytes)
}

fn record_digests(
    store: &dyn Store,
    file: FileId,
    kind: DigestKind,
    digests: &DigestSet,
) -> Result<(), StoreError> {
    for (algorithm, digest) in digests.iter() {
        store.record_digest(file, kind, algorithm, digest)?;
    }
    Ok(())
}

/// Hash, identify and validate one executable, then link it to any
/// catalog that lists it.
///
/// Digests are recorded before signature validation, so they persist
/// even if validation fails.
pub fn analyze_executable(
    ctx: &AnalysisContext<'_>,
    file: FileId,
) -> Result<ExecutableReport, AnalysisError> {
    tracing::info!(file_id = %file, "processing executable");
    let object = ctx
        .store
        .executable(file)?
        .ok_or(AnalysisError::UnknownFile(file))?;
    let bytes = fetch_checked(ctx.objects, &object)?;

    let generic = DigestSet::generic(&bytes);
    record_digests(ctx.store, file, DigestKind::Generic, &generic)?;

    let mut report = ExecutableReport {
        file,
        generic,
        authenticode: None,
        pe_info: None,
        validation: None,
        signer: None,
        countersigner: None,
        reconcile: ReconcileSummary::default(),
    };

    let pe = match PeImage::parse(&bytes) {
        Ok(pe) => pe,
        Err(err) => {
            tracing::error!(file_id = %file, "not a PE file: {err}");
            return Ok(report);
        }
    };

    let info = pe.version_info();
    ctx.store.record_pe_info(file, &info)?;
    report.pe_info = Some(info);

    match DigestSet::authenticode(&pe) {
        Ok(digests) => {
            record_digests(ctx.store, file, DigestKind::Authenticode, &digests)?;
            report.reconcile = TrustReconciler::new(ctx.store)
                .reconcile_executable(file, &digests)?;
            report.authenticode = Some(digests);
        }
        Err(err) => {
            tracing::warn!(file_id = %file, "cannot compute authenticode digest: {err}");
        }
    }

    let Some(validation) =
        AuthenticodeValidator::new(ctx.clock.now()).validate(&pe)?
    else {
        tracing::info!(file_id = %file, "file has no signature");
        return Ok(report);
    };
    tracing::info!(file_id = %file, status = ?validation.status, "validated signature");

    match (&validation.status, &validation.signer) {
        (SignatureStatus::Valid, Some(signer)) => {
            let id = ctx.store.upsert_signer(signer)?.id;
            ctx.store.associate_file_signer(file, id)?;
            report.signer = Some(id);
        }
        (SignatureStatus::Valid, None) => {}
        (SignatureStatus::Invalid(failure), _) => {
            tracing::warn!(
                file_id = %file,
                "not associating signer with file: {failure}"
            );
        }
    }

    match &validation.countersignature {
        Some(countersignature) if !countersignature.status.is_valid() => {
            tracing::warn!(
                file_id = %file,
                status = ?countersignature.status,
                "not associating countersigner with file"
            );
        }
        Some(countersignature) => {
            if let (Some(signer), Some(timestamp)) =
                (&countersignature.signer, countersignature.timestamp)
            {
                let id = ctx.store.upsert_signer(signer)?.id;
                ctx.store.associate_file_countersigner(file, id, timestamp)?;
                report.countersigner = Some(id);
            }
        }
        None => tracing::info!(file_id = %file, "countersignature is not present"),
    }

    report.validation = Some(validation);
    Ok(report)
}

/// Decode one catalog, record its signer and trust list, and link each
/// entry to matching executables.
///
/// The catalog's own signature is not verified.
pub fn analyze_catalog(
    ctx: &AnalysisContext<'_>,
    catalog: CatalogId,
) -> Result<CatalogReport, AnalysisError> {
    tracing::info!(catalog_id = %catalog, "analyzing catalog");
    let object = ctx
        .store
        .catalog(catalog)?
        .ok_or(AnalysisError::UnknownCatalog(catalog))?;
    let bytes = fetch_checked(ctx.objects, &object)?;

    let decoded = decode_catalog(&bytes)?;
    let signer_id = decoded
        .signer
        .as_ref()
        .map(|signer| ctx.store.upsert_signer(signer))
        .transpose()?
        .map(|upserted| upserted.id);
    ctx.store
        .record_catalog_analysis(catalog, signer_id, ctx.clock.now())?;

    let reconcile = TrustReconciler::new(ctx.store).reconcile_catalog(
        catalog,
        signer_id,
        &decoded.entries,
    )?;
    tracing::info!(
        catalog_id = %catalog,
        entries = decoded.entries.len(),
        matches = reconcile.matches,
        "catalog analyzed"
    );

    Ok(CatalogReport {
        catalog,
        signer: decoded.signer,
        signer_id,
        member_count: decoded.member_count,
        entry_count: decoded.entries.len(),
        reconcile,
    })
}

/// Run one task, logging instead of propagating any failure.
pub fn run_task(ctx: &AnalysisContext<'_>, task: &Task) -> TaskOutcome {
    let result = match task {
        Task::File(task) => {
            analyze_executable(ctx, task.file_id).map(TaskOutcome::Executable)
        }
        Task::Catalog(task) => {
            analyze_catalog(ctx, task.catalog_id).map(TaskOutcome::Catalog)
        }
    };
    result.unwrap_or_else(|err| {
        tracing::error!(%task, "task failed: {err}");
        TaskOutcome::Failed(err)
    })
}
