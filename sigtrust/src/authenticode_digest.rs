// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::{PeOffsetError, PeTrait};
use const_oid::db::rfc5912::{
    ID_MD_5, ID_SHA_1, ID_SHA_256, ID_SHA_384, ID_SHA_512,
};
use const_oid::ObjectIdentifier;
use core::fmt::{self, Display, Formatter};
use digest::{Digest, Update};
use md5::Md5;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use std::collections::BTreeMap;

/// Hash algorithms understood by the digest and validation code.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Algorithms recorded for every file.
    pub const RECORDED: [Self; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    /// Lowercase name used as a persistence key (`md5`, `sha1`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Look up the algorithm for a hash OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            ID_MD_5 => Some(Self::Md5),
            ID_SHA_1 => Some(Self::Sha1),
            ID_SHA_256 => Some(Self::Sha256),
            ID_SHA_384 => Some(Self::Sha384),
            ID_SHA_512 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// The algorithm's OID.
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            Self::Md5 => ID_MD_5,
            Self::Sha1 => ID_SHA_1,
            Self::Sha256 => ID_SHA_256,
            Self::Sha384 => ID_SHA_384,
            Self::Sha512 => ID_SHA_512,
        }
    }

    /// Hash a single buffer.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let result: Result<_, core::convert::Infallible> =
            self.compute(|hasher| {
                hasher.update(data);
                Ok(())
            });
        match result {
            Ok(digest) => digest,
            Err(never) => match never {},
        }
    }

    /// Run `feed` against a fresh hasher for this algorithm and return
    /// the finalized digest.
    pub fn compute<E>(
        self,
        feed: impl FnOnce(&mut dyn Update) -> Result<(), E>,
    ) -> Result<Vec<u8>, E> {
        fn run<D, E>(
            feed: impl FnOnce(&mut dyn Update) -> Result<(), E>,
        ) -> Result<Vec<u8>, E>
        where
            D: Digest + Update,
        {
            let mut hasher = D::new();
            feed(&mut hasher)?;
            Ok(hasher.finalize().to_vec())
        }

        match self {
            Self::Md5 => run::<Md5, E>(feed),
            Self::Sha1 => run::<Sha1, E>(feed),
            Self::Sha256 => run::<Sha256, E>(feed),
            Self::Sha384 => run::<Sha384, E>(feed),
            Self::Sha512 => run::<Sha512, E>(feed),
        }
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a digest covers the whole file or only the authenticode
/// ranges of a PE image.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    /// Digest of every byte.
    Generic,
    /// Authenticode digest; only defined for PE images.
    Authenticode,
}

/// Computes md5, sha1 and sha256 in a single pass.
#[derive(Clone, Default)]
pub struct MultiHasher {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
}

impl Update for MultiHasher {
    fn update(&mut self, data: &[u8]) {
        Update::update(&mut self.md5, data);
        Update::update(&mut self.sha1, data);
        Update::update(&mut self.sha256, data);
    }
}

impl MultiHasher {
    /// Finalize every hasher into a [`DigestSet`].
    pub fn finalize(self) -> DigestSet {
        let mut digests = BTreeMap::new();
        digests.insert(DigestAlgorithm::Md5, self.md5.finalize().to_vec());
        digests.insert(DigestAlgorithm::Sha1, self.sha1.finalize().to_vec());
        digests
            .insert(DigestAlgorithm::Sha256, self.sha256.finalize().to_vec());
        DigestSet { digests }
    }
}

/// Digests of one file, keyed by algorithm.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DigestSet {
    digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
}

impl DigestSet {
    /// md5, sha1 and sha256 over all of `data`.
    pub fn generic(data: &[u8]) -> Self {
        let mut hasher = MultiHasher::default();
        hasher.update(data);
        hasher.finalize()
    }

    /// md5, sha1 and sha256 authenticode digests of `pe`.
    pub fn authenticode(pe: &dyn PeTrait) -> Result<Self, PeOffsetError> {
        let mut hasher = MultiHasher::default();
        authenticode_digest(pe, &mut hasher)?;
        Ok(hasher.finalize())
    }

    /// Digest for `algorithm`, if computed.
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&[u8]> {
        self.digests.get(&algorithm).map(Vec::as_slice)
    }

    /// Iterate over `(algorithm, digest)` pairs in algorithm order.
    pub fn iter(&self) -> impl Iterator<Item = (DigestAlgorithm, &[u8])> {
        self.digests.iter().map(|(alg, bytes)| (*alg, bytes.as_slice()))
    }
}

impl FromIterator<(DigestAlgorithm, Vec<u8>)> for DigestSet {
    fn from_iter<T: IntoIterator<Item = (DigestAlgorithm, Vec<u8>)>>(
        iter: T,
    ) -> Self {
        Self {
            digests: iter.into_iter().collect(),
        }
    }
}

fn authenticode_digest_impl(
    pe: &dyn PeTrait,
    digest: &mut dyn Update,
) -> Option<()> {
    let data = pe.data();
    let offsets = pe.offsets().ok()?;

    // Hash from beginning to checksum.
    digest.update(data.get(..offsets.check_sum)?);

    // Hash from checksum to the security data directory, if any.
    let rest = match offsets.security_data_dir {
        Some(entry) => {
            digest.update(data.get(offsets.after_check_sum..entry.start)?);
            entry.end
        }
        None => offsets.after_check_sum,
    };

    // Everything after that, minus the certificate table the entry
    // points at.
    match pe.certificate_table_range().ok()? {
        Some(table) => {
            if table.start < rest || table.end > data.len() {
                return None;
            }
            digest.update(data.get(rest..table.start)?);
            digest.update(data.get(table.end..)?);
        }
        None => digest.update(data.get(rest..)?),
    }

    Some(())
}

/// Calculate an authenticode digest.
///
/// The image is hashed in file order, skipping the optional header's
/// `CheckSum`, the security data directory entry and the certificate
/// table it points at. Adding or replacing a signature therefore does
/// not change the digest.
pub fn authenticode_digest(
    pe: &dyn PeTrait,
    digest: &mut dyn Update,
) -> Result<(), PeOffsetError> {
    authenticode_digest_impl(pe, digest).ok_or(PeOffsetError)
}
