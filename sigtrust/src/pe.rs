// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use core::ops::Range;

/// An offset within the PE is invalid.
///
/// This can occur if an offset is larger than the PE itself, if two
/// regions that must be ordered overlap, or if arithmetic overflow
/// occurs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("an offset within the PE is invalid")]
pub struct PeOffsetError;

/// Offsets of the header fields that Authenticode excludes from the hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeOffsets {
    /// Offset of the `CheckSum` field in the optional header.
    pub check_sum: usize,
    /// Offset of the next byte after the `CheckSum` field.
    pub after_check_sum: usize,

    /// File range of the security data directory entry itself (not the
    /// certificate table it points to). `None` when the image declares
    /// too few data directories to have one; such an image is unsigned.
    pub security_data_dir: Option<Range<usize>>,
}

/// Read access to the parts of a PE image that matter for code signing.
///
/// Implementations only need bounds-checked access; validating that the
/// image is a well-formed PE is left to the parser behind them (see
/// [`PeImage`]). An invalid image can only cause an error to be
/// returned, never a panic.
///
/// [`PeImage`]: crate::PeImage
pub trait PeTrait {
    /// Get the raw bytes of the PE file.
    fn data(&self) -> &[u8];

    /// Get the COFF `Machine` field.
    fn machine(&self) -> u16;

    /// Get the number of sections.
    fn num_sections(&self) -> usize;

    /// Get a section's file range.
    ///
    /// The section `index` starts at 1. The start of the range is
    /// `PointerToRawData` and its size is `SizeOfRawData`. Returns an
    /// error for an index outside `1..=num_sections()`.
    fn section_data_range(
        &self,
        index: usize,
    ) -> Result<Range<usize>, PeOffsetError>;

    /// Get the certificate table's file range, if present.
    ///
    /// Unlike every other data directory, the security directory holds a
    /// file offset rather than a virtual address.
    fn certificate_table_range(
        &self,
    ) -> Result<Option<Range<usize>>, PeOffsetError>;

    /// Get the offsets of the header fields excluded from the hash.
    fn offsets(&self) -> Result<PeOffsets, PeOffsetError>;
}
