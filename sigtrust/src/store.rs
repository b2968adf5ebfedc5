// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Interfaces to the persistent store, the object store and the clock.
//!
//! The analysis code only talks to these traits. [`MemoryStore`],
//! [`MemoryObjectStore`] and [`FsObjectStore`] are complete
//! implementations used by the tests and the command-line tool.

use crate::authenticode_digest::{DigestAlgorithm, DigestKind};
use crate::cert_directory::CertInfo;
use crate::version_info::PeInfo;
use core::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of an executable file record.
    FileId
);
id_type!(
    /// Identifier of a catalog file record.
    CatalogId
);
id_type!(
    /// Identifier of a signer record.
    SignerId
);
id_type!(
    /// Identifier of a trust-list entry record.
    TrustListEntryId
);

/// Result of an idempotent insert.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Upserted<Id> {
    /// Identity of the row, new or existing.
    pub id: Id,
    /// Whether the row already existed.
    pub existed: bool,
}

/// Content address and declared size of a stored file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredObject {
    /// SHA-256 of the content.
    pub sha256: Vec<u8>,
    /// Size recorded when the file was uploaded.
    pub size: u64,
}

/// A trust-list entry that matches a digest, with its catalog's signer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrustListMatch {
    /// Matching entry.
    pub entry: TrustListEntryId,
    /// Catalog the entry belongs to.
    pub catalog: CatalogId,
    /// Signer of that catalog, if it has been analyzed.
    pub signer: Option<SignerId>,
}

/// Error returned by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No executable with this id.
    #[error("file {0} not found")]
    UnknownFile(FileId),

    /// No catalog with this id.
    #[error("catalog {0} not found")]
    UnknownCatalog(CatalogId),

    /// No trust-list entry with this id.
    #[error("trust list entry {0} not found")]
    UnknownTrustListEntry(TrustListEntryId),

    /// A previous holder of the store's lock panicked.
    #[error("store lock poisoned")]
    Poisoned,

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistent records produced by analysis.
///
/// Every upsert must be idempotent when called concurrently for the
/// same key: exactly one caller observes `existed == false`.
pub trait Store: Send + Sync {
    /// Content address and declared size of an executable.
    fn executable(&self, file: FileId) -> Result<Option<StoredObject>, StoreError>;

    /// Content address and declared size of a catalog.
    fn catalog(&self, catalog: CatalogId) -> Result<Option<StoredObject>, StoreError>;

    /// Persist one digest of an executable.
    fn record_digest(
        &self,
        file: FileId,
        kind: DigestKind,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<(), StoreError>;

    /// Persist version information and architecture.
    fn record_pe_info(&self, file: FileId, info: &PeInfo) -> Result<(), StoreError>;

    /// Insert a trust-list entry unique on `(catalog, digest, algorithm)`.
    fn upsert_trust_list_entry(
        &self,
        catalog: CatalogId,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Upserted<TrustListEntryId>, StoreError>;

    /// Link a trust-list entry to the file it vouches for.
    fn set_trust_list_entry_file(
        &self,
        entry: TrustListEntryId,
        file: FileId,
    ) -> Result<(), StoreError>;

    /// Insert a signer unique on `(serial number, subject)`.
    fn upsert_signer(&self, signer: &CertInfo) -> Result<Upserted<SignerId>, StoreError>;

    /// Associate a file with a signer. Returns `true` if newly created.
    fn associate_file_signer(
        &self,
        file: FileId,
        signer: SignerId,
    ) -> Result<bool, StoreError>;

    /// Associate a file with a countersigner and its signing time.
    /// Returns `true` if newly created.
    fn associate_file_countersigner(
        &self,
        file: FileId,
        signer: SignerId,
        timestamp: u64,
    ) -> Result<bool, StoreError>;

    /// Executables whose authenticode digest for `algorithm` is `digest`.
    fn lookup_files_by_digest(
        &self,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<FileId>, StoreError>;

    /// Trust-list entries for `(digest, algorithm)` in any catalog.
    fn lookup_trust_list_entries(
        &self,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<TrustListMatch>, StoreError>;

    /// Record that a catalog was analyzed.
    fn record_catalog_analysis(
        &self,
        catalog: CatalogId,
        signer: Option<SignerId>,
        analyzed_at: SystemTime,
    ) -> Result<(), StoreError>;
}

/// Snapshot of a trust-list entry held by a [`MemoryStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustListEntry {
    /// Entry identity.
    pub id: TrustListEntryId,
    /// Owning catalog.
    pub catalog: CatalogId,
    /// Digest bytes.
    pub digest: Vec<u8>,
    /// Digest algorithm.
    pub algorithm: DigestAlgorithm,
    /// File the entry has been matched to.
    pub file: Option<FileId>,
}

#[derive(Default)]
struct ExecutableRow {
    object: Option<StoredObject>,
    digests: HashMap<(DigestKind, DigestAlgorithm), Vec<u8>>,
    pe_info: Option<PeInfo>,
}

#[derive(Default)]
struct CatalogRow {
    object: Option<StoredObject>,
    signer: Option<SignerId>,
    analyzed_at: Option<SystemTime>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    executables: BTreeMap<FileId, ExecutableRow>,
    catalogs: BTreeMap<CatalogId, CatalogRow>,
    trust_list: BTreeMap<TrustListEntryId, TrustListEntry>,
    trust_list_keys: HashMap<(CatalogId, Vec<u8>, DigestAlgorithm), TrustListEntryId>,
    signers: BTreeMap<SignerId, CertInfo>,
    signer_keys: HashMap<(String, String), SignerId>,
    file_signers: BTreeSet<(FileId, SignerId)>,
    file_countersigners: BTreeMap<(FileId, SignerId), u64>,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }
}

/// [`Store`] held in memory behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Register an uploaded executable.
    pub fn insert_executable(&self, object: StoredObject) -> Result<FileId, StoreError> {
        let mut state = self.lock()?;
        let id = FileId(state.allocate());
        state.executables.insert(
            id,
            ExecutableRow {
                object: Some(object),
                ..ExecutableRow::default()
            },
        );
        Ok(id)
    }

    /// Register an uploaded catalog.
    pub fn insert_catalog(&self, object: StoredObject) -> Result<CatalogId, StoreError> {
        let mut state = self.lock()?;
        let id = CatalogId(state.allocate());
        state.catalogs.insert(
            id,
            CatalogRow {
                object: Some(object),
                ..CatalogRow::default()
            },
        );
        Ok(id)
    }

    /// A recorded digest of an executable.
    pub fn digest(
        &self,
        file: FileId,
        kind: DigestKind,
        algorithm: DigestAlgorithm,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .lock()?
            .executables
            .get(&file)
            .and_then(|row| row.digests.get(&(kind, algorithm)).cloned()))
    }

    /// Recorded version information of an executable.
    pub fn pe_info(&self, file: FileId) -> Result<Option<PeInfo>, StoreError> {
        Ok(self
            .lock()?
            .executables
            .get(&file)
            .and_then(|row| row.pe_info.clone()))
    }

    /// Every trust-list entry, in id order.
    pub fn trust_list_entries(&self) -> Result<Vec<TrustListEntry>, StoreError> {
        Ok(self.lock()?.trust_list.values().cloned().collect())
    }

    /// Every signer, in id order.
    pub fn signers(&self) -> Result<Vec<(SignerId, CertInfo)>, StoreError> {
        Ok(self
            .lock()?
            .signers
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect())
    }

    /// Signers associated with `file`.
    pub fn file_signers(&self, file: FileId) -> Result<Vec<SignerId>, StoreError> {
        Ok(self
            .lock()?
            .file_signers
            .iter()
            .filter(|(f, _)| *f == file)
            .map(|(_, signer)| *signer)
            .collect())
    }

    /// Countersigners associated with `file`, with their timestamps.
    pub fn file_countersigners(
        &self,
        file: FileId,
    ) -> Result<Vec<(SignerId, u64)>, StoreError> {
        Ok(self
            .lock()?
            .file_countersigners
            .iter()
            .filter(|((f, _), _)| *f == file)
            .map(|((_, signer), timestamp)| (*signer, *timestamp))
            .collect())
    }

    /// Signer and time recorded by the last analysis of `catalog`.
    pub fn catalog_analysis(
        &self,
        catalog: CatalogId,
    ) -> Result<Option<(Option<SignerId>, SystemTime)>, StoreError> {
        Ok(self.lock()?.catalogs.get(&catalog).and_then(|row| {
            row.analyzed_at.map(|at| (row.signer, at))
        }))
    }
}

impl Store for MemoryStore {
    fn executable(&self, file: FileId) -> Result<Option<StoredObject>, StoreError> {
        Ok(self
            .lock()?
            .executables
            .get(&file)
            .and_then(|row| row.object.clone()))
    }

    fn catalog(&self, catalog: CatalogId) -> Result<Option<StoredObject>, StoreError> {
        Ok(self
            .lock()?
            .catalogs
            .get(&catalog)
            .and_then(|row| row.object.clone()))
    }

    fn record_digest(
        &self,
        file: FileId,
        kind: DigestKind,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .executables
            .get_mut(&file)
            .ok_or(StoreError::UnknownFile(file))?;
        row.digests.insert((kind, algorithm), digest.to_vec());
        Ok(())
    }

    fn record_pe_info(&self, file: FileId, info: &PeInfo) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .executables
            .get_mut(&file)
            .ok_or(StoreError::UnknownFile(file))?;
        row.pe_info = Some(info.clone());
        Ok(())
    }

    fn upsert_trust_list_entry(
        &self,
        catalog: CatalogId,
        digest: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Upserted<TrustListEntryId>, StoreError> {
        let mut state = self.lock()?;
        let key = (catalog, digest.to_vec(), algorithm);
        if let Some(id) = state.trust_list_keys.get(&key) {
            return Ok(Upserted {
                id: *id,
                existed: true,
            });
        }

        let id = TrustListEntryId(state.allocate());
        state.trust_list.insert(
            id,
            TrustListEntry {
                id,
                catalog,
                digest: digest.to_vec(),
                algorithm,
                file: None,
            },
        );
        state.trust_list_keys.insert(key, id);
        Ok(Upserted { id, existed: false })
    }

    fn set_trust_list_entry_file(
        &self,
        entry: TrustListEntryId,
        file: FileId,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .trust_list
            .get_mut(&entry)
            .ok_or(StoreError::UnknownTrustListEntry(entry))?;
        row.file = Some(file);
        Ok(())
    }

    fn upsert_signer(&self, signer: &CertInfo) -> Result<Upserted<SignerId>, StoreError> {
        let mut state = self.lock()?;
        let key = (signer.serial_number.clone(), signer.subject.clone());
        if let Some(id) = state.signer_keys.get(&key) {
            return Ok(Upserted {
                id: *id,
                existed: true,
            });
        }

        let id = SignerId(state.allocate());
        // The timestamp belongs to the association, not the signer.
        let mut record = signer.clone();
        record.timestamp = None;
        state.signers.insert(id, record);
        state.signer_keys.insert(key, id);
        Ok(Upserted { id, existed: false })
    }

    fn associate_file_signer(
        &self,
        file: FileId,
        signer: SignerId,
    ) -> Result<bool, StoreError> {
        Ok(self.lock()?.file_signers.insert((file, signer)))
    }

    fn associate_file_countersigner(
        &self,
        file: FileId,
        signer: SignerId,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.file_countersigners.contains_key(&(file, signer)) {
            return Ok(false);
        }
        state.file_countersigners.insert((file, signer), timestamp);
        Ok(true)
    }

    fn lookup_files_by_digest(
        &self,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<FileId>, StoreError> {
        let key = (DigestKind::Authenticode, algorithm);
        Ok(self
            .lock()?
            .executables
            .iter()
            .filter(|(_, row)| {
                row.digests.get(&key).map(Vec::as_slice) == Some(digest)
            })
            .map(|(id, _)| *id)
            .collect())
    }

    fn lookup_trust_list_entries(
        &self,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<TrustListMatch>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .trust_list
            .values()
            .filter(|entry| entry.algorithm == algorithm && entry.digest == digest)
            .map(|entry| TrustListMatch {
                entry: entry.id,
                catalog: entry.catalog,
                signer: state
                    .catalogs
                    .get(&entry.catalog)
                    .and_then(|row| row.signer),
            })
            .collect())
    }

    fn record_catalog_analysis(
        &self,
        catalog: CatalogId,
        signer: Option<SignerId>,
        analyzed_at: SystemTime,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .catalogs
            .get_mut(&catalog)
            .ok_or(StoreError::UnknownCatalog(catalog))?;
        row.signer = signer;
        row.analyzed_at = Some(analyzed_at);
        Ok(())
    }
}

/// Relative path of an object in the sharded object namespace:
/// `<hex[0..2]>/<hex[2..4]>/<hex>`.
pub fn object_path(sha256: &[u8]) -> String {
    let hex = hex::encode(sha256);
    let first = hex.get(0..2).unwrap_or_default();
    let second = hex.get(2..4).unwrap_or_default();
    format!("{first}/{second}/{hex}")
}

/// Error returned by an [`ObjectStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No object at this path.
    #[error("object {0} not found")]
    NotFound(String),

    /// Reading the object failed.
    #[error("failed to read object {path}: {source}")]
    Io {
        /// Object path.
        path: String,
        /// Underlying error.
        source: io::Error,
    },

    /// A previous holder of the store's lock panicked.
    #[error("object store lock poisoned")]
    Poisoned,
}

/// Content-addressed file storage.
pub trait ObjectStore: Send + Sync {
    /// Fetch the object whose SHA-256 is `sha256`.
    fn fetch(&self, sha256: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// [`ObjectStore`] over a directory using [`object_path`] layout.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Serve objects below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for FsObjectStore {
    fn fetch(&self, sha256: &[u8]) -> Result<Vec<u8>, StorageError> {
        let path = object_path(sha256);
        match fs_err::read(self.root.join(&path)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path))
            }
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// [`ObjectStore`] held in memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` and return their SHA-256.
    pub fn insert(&self, bytes: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        let sha256 = DigestAlgorithm::Sha256.digest(&bytes);
        self.objects
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .insert(object_path(&sha256), bytes);
        Ok(sha256)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn fetch(&self, sha256: &[u8]) -> Result<Vec<u8>, StorageError> {
        let path = object_path(sha256);
        self.objects
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .get(&path)
            .cloned()
            .ok_or(StorageError::NotFound(path))
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock stopped at a fixed time.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}
