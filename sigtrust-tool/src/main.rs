// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use der::Encode;
use fs_err as fs;
use sigtrust::{
    decode_catalog, run_task, AnalysisContext, AttributeCertificateIterator,
    AuthenticodeValidator, CatalogTask, DigestSet, FileTask,
    MemoryObjectStore, MemoryStore, PeImage, StoredObject, SystemClock, Task,
    TaskOutcome,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    action: Action,
}

#[derive(Parser)]
struct GetCertAction {
    pe_path: PathBuf,
    sig_index: usize,
    cert_index: usize,
}

#[derive(Parser)]
struct ReconcileAction {
    /// Catalog files to decode before the executables.
    #[arg(long = "catalog")]
    catalogs: Vec<PathBuf>,
    /// Executables to analyze.
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Action {
    /// Print digests, version info and signature status of a PE file.
    Info { pe_path: PathBuf },
    /// Write one embedded certificate to stdout as DER.
    GetCert(GetCertAction),
    /// Print the signer and member digests of a catalog file.
    Catalog { cat_path: PathBuf },
    /// Run the full analysis over a set of catalogs and executables.
    Reconcile(ReconcileAction),
}

fn print_digests(label: &str, digests: &DigestSet) {
    for (algorithm, digest) in digests.iter() {
        println!("{label} {:<7} {}", algorithm.name(), hex::encode(digest));
    }
}

fn action_info(pe_path: &Path) -> Result<()> {
    let data = fs::read(pe_path)?;
    print_digests("file", &DigestSet::generic(&data));

    let pe = PeImage::parse(&data)?;
    print_digests("authenticode", &DigestSet::authenticode(&pe)?);
    println!("{}", serde_json::to_string_pretty(&pe.version_info())?);

    let Some(report) = AuthenticodeValidator::new(SystemTime::now()).validate(&pe)?
    else {
        println!("No signatures");
        return Ok(());
    };

    println!("Signatures: {}", report.signature_count);
    match &report.status {
        sigtrust::SignatureStatus::Valid => println!("Status: valid"),
        sigtrust::SignatureStatus::Invalid(failure) => {
            println!("Status: invalid ({failure})")
        }
    }
    if let Some(signer) = &report.signer {
        println!("Signer: {}", serde_json::to_string_pretty(signer)?);
    }
    if let Some(countersignature) = &report.countersignature {
        println!("Countersignature valid: {}", countersignature.status.is_valid());
        if let Some(signer) = &countersignature.signer {
            println!("Countersigner: {}", serde_json::to_string_pretty(signer)?);
        }
    }

    Ok(())
}

fn action_get_cert(action: &GetCertAction) -> Result<()> {
    let data = fs::read(&action.pe_path)?;
    let pe = PeImage::parse(&data)?;
    let signatures = if let Some(iter) = AttributeCertificateIterator::new(&pe)? {
        iter.map(|attr_cert| attr_cert.get_authenticode_signature())
            .collect::<Result<Vec<_>, _>>()?
    } else {
        bail!("input file has no signatures");
    };

    let s = &signatures
        .get(action.sig_index)
        .ok_or(anyhow!("invalid signature index"))?;

    let cert = s
        .certificates()
        .nth(action.cert_index)
        .ok_or(anyhow!("invalid certificate index"))?;
    let der = cert.to_der()?;
    io::stdout().write_all(&der)?;
    Ok(())
}

fn action_catalog(cat_path: &Path) -> Result<()> {
    let data = fs::read(cat_path)?;
    let catalog = decode_catalog(&data)?;

    match &catalog.signer {
        Some(signer) => {
            println!("Signer: {}", serde_json::to_string_pretty(signer)?)
        }
        None => println!("Signer: unknown"),
    }
    println!(
        "Members: {} ({} usable)",
        catalog.member_count,
        catalog.entries.len()
    );
    for entry in &catalog.entries {
        println!(
            "  {:>5} {} {}",
            entry.member_index,
            entry.algorithm.name(),
            hex::encode(&entry.digest)
        );
    }
    for skipped in &catalog.skipped {
        println!("  {:>5} skipped: {:?}", skipped.member_index, skipped.reason);
    }
    Ok(())
}

fn stored_object(
    objects: &MemoryObjectStore,
    path: &Path,
) -> Result<StoredObject> {
    let bytes = fs::read(path)?;
    let size = u64::try_from(bytes.len())?;
    let sha256 = objects.insert(bytes)?;
    Ok(StoredObject { sha256, size })
}

fn action_reconcile(action: &ReconcileAction) -> Result<()> {
    let objects = MemoryObjectStore::new();
    let store = MemoryStore::new();
    let ctx = AnalysisContext {
        objects: &objects,
        store: &store,
        clock: &SystemClock,
    };

    let mut failures = 0;
    for path in &action.catalogs {
        let catalog_id = store.insert_catalog(stored_object(&objects, path)?)?;
        match run_task(&ctx, &Task::Catalog(CatalogTask { catalog_id })) {
            TaskOutcome::Catalog(report) => println!(
                "{}: {} entries, {} matched",
                path.display(),
                report.entry_count,
                report.reconcile.matches
            ),
            _ => failures += 1,
        }
    }

    for path in &action.files {
        let file_id = store.insert_executable(stored_object(&objects, path)?)?;
        if !matches!(
            run_task(&ctx, &Task::File(FileTask { file_id })),
            TaskOutcome::Executable(_)
        ) {
            failures += 1;
            continue;
        }

        let signers = store.signers()?;
        let names: Vec<_> = store
            .file_signers(file_id)?
            .into_iter()
            .filter_map(|id| {
                signers
                    .iter()
                    .find(|(signer, _)| *signer == id)
                    .map(|(_, info)| info.subject_short_name.as_str())
            })
            .collect();
        if names.is_empty() {
            println!("{}: unsigned", path.display());
        } else {
            println!("{}: signed by {}", path.display(), names.join(", "));
        }
    }

    if failures > 0 {
        bail!("{failures} task(s) failed");
    }
    tracing::info!(
        catalogs = action.catalogs.len(),
        files = action.files.len(),
        "reconciliation complete"
    );
    Ok(())
}

fn run_action(action: &Action) -> Result<()> {
    match action {
        Action::GetCert(action) => action_get_cert(action),
        Action::Info { pe_path } => action_info(pe_path),
        Action::Catalog { cat_path } => action_catalog(cat_path),
        Action::Reconcile(action) => action_reconcile(action),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    run_action(&Cli::parse().action)
}
