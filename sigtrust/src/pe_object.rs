// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::pe::{PeOffsetError, PeOffsets, PeTrait};
use crate::usize_from_u32;
use crate::version_info::{PeInfo, VersionInfoError};
use core::mem;
use core::ops::Range;
use object::pe::{
    ImageDataDirectory, IMAGE_DIRECTORY_ENTRY_SECURITY,
    IMAGE_FILE_MACHINE_AMD64, IMAGE_FILE_MACHINE_I386, RT_VERSION,
};
use object::read::pe::{
    ImageNtHeaders, ImageOptionalHeader, PeFile, PeFile32, PeFile64,
    ResourceDirectoryEntryData,
};
use object::{pod, LittleEndian};

/// Resource trees are type / name / language; anything deeper is bogus.
const MAX_RESOURCE_DEPTH: usize = 3;

/// The input is not a PE/COFF image.
///
/// Callers should stop authenticode processing but keep any generic
/// digests already computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("not a PE/COFF image: {0}")]
pub struct NotPecoffError(pub object::read::Error);

/// Parsed view of a PE32 or PE32+ image.
pub enum PeImage<'data> {
    /// 32-bit image (`PE32`).
    Pe32(PeFile32<'data>),
    /// 64-bit image (`PE32+`).
    Pe64(PeFile64<'data>),
}

impl<'data> PeImage<'data> {
    /// Parse `data` as a PE image, trying PE32+ first.
    pub fn parse(data: &'data [u8]) -> Result<Self, NotPecoffError> {
        if let Ok(pe) = PeFile64::parse(data) {
            Ok(Self::Pe64(pe))
        } else {
            PeFile32::parse(data).map(Self::Pe32).map_err(NotPecoffError)
        }
    }

    fn as_pe(&self) -> &dyn PeTrait {
        match self {
            Self::Pe32(pe) => pe,
            Self::Pe64(pe) => pe,
        }
    }

    /// Bitness derived from the machine type: 32 for i386, 64 for
    /// amd64, `None` for anything else.
    pub fn architecture(&self) -> Option<u32> {
        match self.machine() {
            IMAGE_FILE_MACHINE_I386 => Some(32),
            IMAGE_FILE_MACHINE_AMD64 => Some(64),
            _ => None,
        }
    }

    /// Raw bytes of the first `RT_VERSION` resource, if any.
    pub fn version_resource(
        &self,
    ) -> Result<Option<&'data [u8]>, VersionInfoError> {
        match self {
            Self::Pe32(pe) => version_resource(pe),
            Self::Pe64(pe) => version_resource(pe),
        }
        .map_err(VersionInfoError::Resource)
    }

    /// Version-info strings plus architecture.
    ///
    /// A missing or malformed version resource yields empty strings;
    /// this never fails.
    pub fn version_info(&self) -> PeInfo {
        let mut info = match self.version_resource() {
            Ok(Some(resource)) => PeInfo::from_version_resource(resource)
                .unwrap_or_else(|err| {
                    tracing::warn!("unable to parse version info: {err}");
                    PeInfo::default()
                }),
            Ok(None) => PeInfo::default(),
            Err(err) => {
                tracing::warn!("unable to locate version info: {err}");
                PeInfo::default()
            }
        };
        info.architecture = self.architecture();
        info
    }
}

impl PeTrait for PeImage<'_> {
    fn data(&self) -> &[u8] {
        self.as_pe().data()
    }

    fn machine(&self) -> u16 {
        self.as_pe().machine()
    }

    fn num_sections(&self) -> usize {
        self.as_pe().num_sections()
    }

    fn section_data_range(
        &self,
        index: usize,
    ) -> Result<Range<usize>, PeOffsetError> {
        self.as_pe().section_data_range(index)
    }

    fn certificate_table_range(
        &self,
    ) -> Result<Option<Range<usize>>, PeOffsetError> {
        self.as_pe().certificate_table_range()
    }

    fn offsets(&self) -> Result<PeOffsets, PeOffsetError> {
        self.as_pe().offsets()
    }
}

impl<'data, I> PeTrait for PeFile<'data, I>
where
    I: ImageNtHeaders,
{
    fn data(&self) -> &'data [u8] {
        self.data()
    }

    fn machine(&self) -> u16 {
        self.nt_headers().file_header().machine.get(LittleEndian)
    }

    fn num_sections(&self) -> usize {
        self.section_table().len()
    }

    fn section_data_range(
        &self,
        index: usize,
    ) -> Result<Range<usize>, PeOffsetError> {
        let section = self
            .section_table()
            .section(index)
            .map_err(|_| PeOffsetError)?;
        let start =
            usize_from_u32(section.pointer_to_raw_data.get(LittleEndian));
        let size = usize_from_u32(section.size_of_raw_data.get(LittleEndian));
        let end = start.checked_add(size).ok_or(PeOffsetError)?;
        Ok(start..end)
    }

    fn certificate_table_range(
        &self,
    ) -> Result<Option<Range<usize>>, PeOffsetError> {
        if let Some(dir) = self.data_directory(IMAGE_DIRECTORY_ENTRY_SECURITY) {
            let start = usize_from_u32(dir.virtual_address.get(LittleEndian));
            let size = usize_from_u32(dir.size.get(LittleEndian));
            if size == 0 {
                return Ok(None);
            }
            let end = start.checked_add(size).ok_or(PeOffsetError)?;
            Ok(Some(start..end))
        } else {
            Ok(None)
        }
    }

    fn offsets(&self) -> Result<PeOffsets, PeOffsetError> {
        object_offsets_impl(self).ok_or(PeOffsetError)
    }
}

fn object_offsets_impl<I>(pe: &PeFile<I>) -> Option<PeOffsets>
where
    I: ImageNtHeaders,
{
    // Offset from the start of the pe data to the beginning of `bytes`.
    let get_offset = |bytes: &[u8]| -> Option<usize> {
        let base = pe.data().as_ptr() as usize;
        let bytes_start = bytes.as_ptr() as usize;
        bytes_start.checked_sub(base)
    };

    let optional_header = pe.nt_headers().optional_header();
    let optional_header_bytes = pod::bytes_of(optional_header);
    let optional_header_offset = get_offset(optional_header_bytes)?;
    // `CheckSum` sits at the same offset in the 32-bit and 64-bit headers.
    let check_sum_offset = optional_header_offset.checked_add(64)?;

    // The data directories directly follow the fixed optional header.
    let num_dirs = usize_from_u32(optional_header.number_of_rva_and_sizes());
    let security_data_dir = if num_dirs > IMAGE_DIRECTORY_ENTRY_SECURITY {
        let data_dirs_offset =
            optional_header_offset.checked_add(optional_header_bytes.len())?;
        let dir_size = mem::size_of::<ImageDataDirectory>();
        let start = data_dirs_offset.checked_add(
            dir_size.checked_mul(IMAGE_DIRECTORY_ENTRY_SECURITY)?,
        )?;
        Some(start..start.checked_add(dir_size)?)
    } else {
        None
    };

    Some(PeOffsets {
        check_sum: check_sum_offset,
        after_check_sum: check_sum_offset.checked_add(mem::size_of::<u32>())?,
        security_data_dir,
    })
}

fn version_resource<'data, I>(
    pe: &PeFile<'data, I>,
) -> object::read::Result<Option<&'data [u8]>>
where
    I: ImageNtHeaders,
{
    let sections = pe.section_table();
    let Some(directory) = pe
        .data_directories()
        .resource_directory(pe.data(), &sections)?
    else {
        return Ok(None);
    };

    let root = directory.root()?;
    let Some(mut entry) = root
        .entries
        .iter()
        .find(|entry| entry.name_or_id().id() == Some(RT_VERSION))
    else {
        return Ok(None);
    };

    // Take the first name and the first language below the type entry.
    for _ in 0..MAX_RESOURCE_DEPTH {
        match entry.data(directory)? {
            ResourceDirectoryEntryData::Table(table) => {
                match table.entries.first() {
                    Some(next) => entry = next,
                    None => return Ok(None),
                }
            }
            ResourceDirectoryEntryData::Data(data) => {
                let size = usize_from_u32(data.size.get(LittleEndian));
                return Ok(sections
                    .pe_data_at(pe.data(), data.offset_to_data.get(LittleEndian))
                    .and_then(|bytes| bytes.get(..size)));
            }
        }
    }
    Ok(None)
}
