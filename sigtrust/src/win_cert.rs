// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::usize_from_u32;
use crate::PeTrait;
use crate::{AuthenticodeSignature, Pkcs7Error};

/// Current version of `Win_Certificate` structure.
pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;

/// Certificate contains a PKCS#7 `SignedData` structure.
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;

const HEADER_SIZE: usize = 8;

fn align_up(size: usize, align: usize) -> Option<usize> {
    Some((size.checked_add(align)?.checked_sub(1)?) & !(align.checked_sub(1)?))
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    Some(u16::from_le_bytes(bytes.get(offset..end)?.try_into().ok()?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    Some(u32::from_le_bytes(bytes.get(offset..end)?.try_into().ok()?))
}

fn check_total_size_valid(remaining_data: &[u8]) -> bool {
    let mut iter = AttributeCertificateIterator { remaining_data };
    while iter.next().is_some() {}
    iter.remaining_data.is_empty()
}

/// Error returned by [`AttributeCertificateIterator::new`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AttributeCertificateError {
    /// The certificate table's range is out of bounds.
    #[error("certificate table range is out of bounds")]
    OutOfBounds,

    /// The certiticate table's size does not match the sum of the
    /// certificate entry's aligned sizes.
    #[error("certificate table size does not match the sum of the certificate entry's aligned sizes")]
    InvalidSize,
}

/// Error returned by [`AttributeCertificate::get_authenticode_signature`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AttributeCertificateAuthenticodeError {
    /// Attribute certificate revision does not match [`WIN_CERT_REVISION_2_0`].
    #[error("invalid attribute certificate revision: {0:02x}")]
    InvalidCertificateRevision(u16),

    /// Attribute certificate type does not match [`WIN_CERT_TYPE_PKCS_SIGNED_DATA`].
    #[error("invalid attribute certificate type: {0:02x}")]
    InvalidCertificateType(u16),

    /// Attribute certificate data is not a PKCS#7 `SignedData`.
    #[error("invalid signature: {0}")]
    InvalidSignature(Pkcs7Error),
}

/// Raw data for a PE attribute certificate.
///
/// Note that PE attribute certificates are not related to X.509
/// attribute certificates.
pub struct AttributeCertificate<'a> {
    /// `WIN_CERTIFICATE` version number.
    pub revision: u16,

    /// Certificate type.
    pub certificate_type: u16,

    /// Raw certificate data (not including the header).
    pub data: &'a [u8],
}

impl<'a> AttributeCertificate<'a> {
    /// Whether this entry holds a PKCS#7 signature blob.
    pub fn is_pkcs_signed_data(&self) -> bool {
        self.revision == WIN_CERT_REVISION_2_0
            && self.certificate_type == WIN_CERT_TYPE_PKCS_SIGNED_DATA
    }

    /// Get the certificate data as an authenticode signature.
    pub fn get_authenticode_signature(
        &self,
    ) -> Result<AuthenticodeSignature, AttributeCertificateAuthenticodeError>
    {
        if self.revision != WIN_CERT_REVISION_2_0 {
            return Err(AttributeCertificateAuthenticodeError::InvalidCertificateRevision(self.revision));
        }
        if self.certificate_type != WIN_CERT_TYPE_PKCS_SIGNED_DATA {
            return Err(
                AttributeCertificateAuthenticodeError::InvalidCertificateType(
                    self.certificate_type,
                ),
            );
        }

        AuthenticodeSignature::parse(self.data)
            .map(|(signature, _)| signature)
            .map_err(AttributeCertificateAuthenticodeError::InvalidSignature)
    }
}

/// Iterator over PE attribute certificates.
pub struct AttributeCertificateIterator<'a> {
    remaining_data: &'a [u8],
}

impl<'a> AttributeCertificateIterator<'a> {
    /// Create a new `AttributeCertificateIterator`.
    ///
    /// If there is no attribute certificate table, this returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeCertificateError::OutOfBounds`] if the table
    /// is not within the PE image bounds.
    ///
    /// Returns [`AttributeCertificateError::InvalidSize`] if the table
    /// size does not match the sum of the certificate entry's aligned
    /// sizes.
    pub fn new(
        pe: &'a dyn PeTrait,
    ) -> Result<Option<Self>, AttributeCertificateError> {
        match pe.certificate_table_range() {
            Ok(Some(certificate_table_range)) => {
                let remaining_data = pe
                    .data()
                    .get(certificate_table_range)
                    .ok_or(AttributeCertificateError::OutOfBounds)?;

                if !check_total_size_valid(remaining_data) {
                    return Err(AttributeCertificateError::InvalidSize);
                }
                Ok(Some(Self { remaining_data }))
            }
            Ok(None) => Ok(None),
            Err(_) => Err(AttributeCertificateError::OutOfBounds),
        }
    }
}

impl<'a> Iterator for AttributeCertificateIterator<'a> {
    type Item = AttributeCertificate<'a>;

    /// Yields `None` without advancing on a malformed entry, which
    /// leaves data behind for the size check to report.
    fn next(&mut self) -> Option<Self::Item> {
        let cert_bytes = self.remaining_data;
        let cert_size = usize_from_u32(read_u32(cert_bytes, 0)?);
        let revision = read_u16(cert_bytes, 4)?;
        let certificate_type = read_u16(cert_bytes, 6)?;

        // Get the cert data (excludes the header).
        if cert_size < HEADER_SIZE {
            return None;
        }
        let cert_data = cert_bytes.get(HEADER_SIZE..cert_size)?;

        // Advance to next certificate. Data is 8-byte aligned, so round
        // up; a final entry may omit its padding.
        let size_rounded_up = align_up(cert_size, 8)?;
        self.remaining_data =
            cert_bytes.get(size_rounded_up..).unwrap_or_default();

        Some(AttributeCertificate {
            revision,
            certificate_type,
            data: cert_data,
        })
    }
}

/// Raw DER blobs of every PKCS#7 signature embedded in `pe`.
///
/// Returns `Ok(None)` for an unsigned image. Entries of other types are
/// skipped. A multiply-signed image yields one blob per signature.
pub fn extract_signatures(
    pe: &dyn PeTrait,
) -> Result<Option<Vec<&[u8]>>, AttributeCertificateError> {
    let Some(iter) = AttributeCertificateIterator::new(pe)? else {
        return Ok(None);
    };

    let mut blobs = Vec::new();
    for attr_cert in iter {
        if attr_cert.is_pkcs_signed_data() {
            blobs.push(attr_cert.data);
        } else {
            tracing::warn!(
                revision = attr_cert.revision,
                certificate_type = attr_cert.certificate_type,
                "skipping non-PKCS#7 attribute certificate"
            );
        }
    }

    if blobs.is_empty() {
        Ok(None)
    } else {
        Ok(Some(blobs))
    }
}
