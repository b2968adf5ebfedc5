// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `VS_VERSIONINFO` resource parsing.
//!
//! Every node of the version resource has the same header:
//!
//! ```text
//! u16      wLength       (node size in bytes, including children)
//! u16      wValueLength  (in words for text values, bytes otherwise)
//! u16      wType         (1 = text, 0 = binary)
//! [u16]    szKey         (NUL-terminated UTF-16LE)
//! padding to 32 bits
//! [u8]     Value
//! padding to 32 bits
//! [node]   Children
//! ```
//!
//! Only `StringFileInfo` string tables are read.

use serde::Serialize;

const HEADER_SIZE: usize = 6;
const TEXT_VALUE: u16 = 1;

/// Error returned by [`PeInfo::from_version_resource`].
#[derive(Debug, thiserror::Error)]
pub enum VersionInfoError {
    /// The resource directory could not be walked.
    #[error("invalid resource directory: {0}")]
    Resource(object::read::Error),

    /// A node's declared length runs past its parent.
    #[error("version info node at offset {offset} is truncated")]
    Truncated {
        /// Offset of the node within the resource.
        offset: usize,
    },

    /// The root node is not `VS_VERSION_INFO`.
    #[error("unexpected root key {0:?}")]
    UnexpectedRoot(String),
}

/// Version-resource strings and architecture of an executable.
///
/// Fields that are absent from the resource are empty.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub struct PeInfo {
    /// `ProductName`.
    pub productname: String,
    /// `CompanyName`.
    pub companyname: String,
    /// `FileDescription`.
    pub filedescription: String,
    /// `ProductVersion`.
    pub productversion: String,
    /// `InternalName`.
    pub internalname: String,
    /// `FileVersion`.
    pub fileversion: String,
    /// `OriginalFilename`.
    pub originalfilename: String,
    /// 32 or 64, from the machine type.
    pub architecture: Option<u32>,
}

impl PeInfo {
    /// Parse the raw bytes of an `RT_VERSION` resource.
    ///
    /// Architecture is left unset.
    pub fn from_version_resource(bytes: &[u8]) -> Result<Self, VersionInfoError> {
        let (root, _) = Node::parse(bytes, 0)?;
        if root.key != "VS_VERSION_INFO" {
            return Err(VersionInfoError::UnexpectedRoot(root.key));
        }

        let mut info = Self::default();
        for file_info in root.children() {
            let file_info = file_info?;
            if file_info.key != "StringFileInfo" {
                continue;
            }
            for table in file_info.children() {
                for string in table?.children() {
                    let string = string?;
                    if let Some(field) = info.field_mut(&string.key) {
                        *field = string.text();
                    }
                }
            }
        }
        Ok(info)
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        let field = match key.to_ascii_lowercase().as_str() {
            "productname" => &mut self.productname,
            "companyname" => &mut self.companyname,
            "filedescription" => &mut self.filedescription,
            "productversion" => &mut self.productversion,
            "internalname" => &mut self.internalname,
            "fileversion" => &mut self.fileversion,
            "originalfilename" => &mut self.originalfilename,
            _ => return None,
        };
        Some(field)
    }
}

fn align4(offset: usize) -> Option<usize> {
    Some(offset.checked_add(3)? & !3)
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    Some(u16::from_le_bytes(bytes.get(offset..end)?.try_into().ok()?))
}

/// One node of the version tree. `offset` is relative to the start of
/// the resource, which is 32-bit aligned.
struct Node<'a> {
    key: String,
    value_type: u16,
    value: &'a [u8],
    children: &'a [u8],
    children_offset: usize,
}

impl<'a> Node<'a> {
    /// Parse the node at the start of `bytes`, returning it and its
    /// declared length.
    fn parse(bytes: &'a [u8], offset: usize) -> Result<(Self, usize), VersionInfoError> {
        let truncated = || VersionInfoError::Truncated { offset };
        let length = usize::from(read_u16(bytes, 0).ok_or_else(truncated)?);
        let value_length = usize::from(read_u16(bytes, 2).ok_or_else(truncated)?);
        let value_type = read_u16(bytes, 4).ok_or_else(truncated)?;
        if length < HEADER_SIZE {
            return Err(truncated());
        }
        let node = bytes.get(..length).ok_or_else(truncated)?;

        let mut key = Vec::new();
        let mut pos = HEADER_SIZE;
        loop {
            let unit = read_u16(node, pos).ok_or_else(truncated)?;
            pos = pos.saturating_add(2);
            if unit == 0 {
                break;
            }
            key.push(unit);
        }
        let key = String::from_utf16_lossy(&key);

        // Relative alignment holds because every node starts aligned.
        pos = align4(pos).unwrap_or(usize::MAX).min(node.len());
        let value_size = if value_type == TEXT_VALUE {
            value_length.saturating_mul(2)
        } else {
            value_length
        };
        let value_end = pos.saturating_add(value_size).min(node.len());
        let value = node.get(pos..value_end).unwrap_or_default();

        let children_start = align4(value_end).unwrap_or(usize::MAX).min(node.len());
        let children = node.get(children_start..).unwrap_or_default();

        Ok((
            Self {
                key,
                value_type,
                value,
                children,
                children_offset: offset.saturating_add(children_start),
            },
            length,
        ))
    }

    fn children(&self) -> Children<'a> {
        Children {
            remaining: self.children,
            offset: self.children_offset,
        }
    }

    /// Text value with trailing NULs and non-ASCII characters removed.
    fn text(&self) -> String {
        if self.value_type != TEXT_VALUE {
            return String::new();
        }
        let units: Vec<u16> = self
            .value
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
            .chars()
            .filter(char::is_ascii)
            .collect()
    }
}

struct Children<'a> {
    remaining: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<Node<'a>, VersionInfoError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Trailing padding shorter than a header ends the list.
        if self.remaining.len() < HEADER_SIZE {
            return None;
        }
        match Node::parse(self.remaining, self.offset) {
            Ok((node, length)) => {
                let advance = align4(length)
                    .unwrap_or(usize::MAX)
                    .min(self.remaining.len());
                self.remaining = self.remaining.get(advance..).unwrap_or_default();
                self.offset = self.offset.saturating_add(advance);
                Some(Ok(node))
            }
            Err(err) => {
                self.remaining = &[];
                Some(Err(err))
            }
        }
    }
}
