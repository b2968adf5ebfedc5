// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::authenticode_digest::DigestSet;
use crate::catalog::TrustListCandidate;
use crate::store::{
    CatalogId, FileId, SignerId, Store, StoreError, TrustListEntryId,
};

/// Counts produced by one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    /// Trust-list entries inspected.
    pub entries: usize,
    /// Entries that did not exist before this pass.
    pub new_entries: usize,
    /// (entry, file) matches found.
    pub matches: usize,
    /// File-to-signer associations created by this pass.
    pub new_signer_associations: usize,
}

/// Matches catalog trust-list digests against executable digests.
///
/// Matching works in both directions, so the associations recorded do
/// not depend on whether a catalog or an executable is analyzed first.
pub struct TrustReconciler<'a> {
    store: &'a dyn Store,
}

impl<'a> TrustReconciler<'a> {
    /// Create a reconciler writing to `store`.
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Record a catalog's entries and link each one to the executables
    /// whose authenticode digest it lists.
    ///
    /// `signer` is the catalog's signer; matching files are associated
    /// with it.
    pub fn reconcile_catalog(
        &self,
        catalog: CatalogId,
        signer: Option<SignerId>,
        entries: &[TrustListCandidate],
    ) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();
        for candidate in entries {
            summary.entries = summary.entries.saturating_add(1);
            let upserted = self.store.upsert_trust_list_entry(
                catalog,
                &candidate.digest,
                candidate.algorithm,
            )?;
            if !upserted.existed {
                summary.new_entries = summary.new_entries.saturating_add(1);
            }

            let files = self
                .store
                .lookup_files_by_digest(candidate.algorithm, &candidate.digest)?;
            if files.len() > 1 {
                tracing::warn!(
                    %catalog,
                    digest = %hex::encode(&candidate.digest),
                    count = files.len(),
                    "digest matches more than one file"
                );
            }
            for file in files {
                self.link(upserted.id, file, signer, &mut summary)?;
                tracing::info!(%catalog, file_id = %file, "match found in catalog");
            }
        }
        Ok(summary)
    }

    /// Link an executable to every recorded trust-list entry listing one
    /// of its authenticode digests.
    pub fn reconcile_executable(
        &self,
        file: FileId,
        digests: &DigestSet,
    ) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();
        for (algorithm, digest) in digests.iter() {
            let matches = self.store.lookup_trust_list_entries(algorithm, digest)?;
            summary.entries = summary.entries.saturating_add(matches.len());
            for found in matches {
                self.link(found.entry, file, found.signer, &mut summary)?;
                tracing::info!(
                    catalog = %found.catalog,
                    file_id = %file,
                    %algorithm,
                    "match found in catalog"
                );
            }
        }
        Ok(summary)
    }

    fn link(
        &self,
        entry: TrustListEntryId,
        file: FileId,
        signer: Option<SignerId>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), StoreError> {
        self.store.set_trust_list_entry_file(entry, file)?;
        summary.matches = summary.matches.saturating_add(1);
        if let Some(signer) = signer {
            if self.store.associate_file_signer(file, signer)? {
                summary.new_signer_associations =
                    summary.new_signer_associations.saturating_add(1);
            }
        }
        Ok(())
    }
}
