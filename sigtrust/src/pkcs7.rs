// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::asn1::{decode_prefix, Asn1Error};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use const_oid::db::rfc6268::ID_SIGNED_DATA;
use der::asn1::ObjectIdentifier;

/// Error returned by [`parse_signed_data`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Pkcs7Error {
    /// The outer `ContentInfo` is malformed.
    #[error("invalid content info: {0}")]
    InvalidContentInfo(#[from] Asn1Error),

    /// The content type is not `signedData`.
    #[error("content type is {0}, not signedData")]
    NotSignedData(ObjectIdentifier),

    /// The content is not a valid `SignedData`.
    #[error("invalid signed data: {0}")]
    InvalidSignedData(der::Error),

    /// The `SignedData` has no signer infos.
    #[error("signed data has no signer info")]
    NoSignerInfo,
}

/// Decode a DER `ContentInfo` wrapping a PKCS#7 `SignedData`.
///
/// Returns the signed data and any bytes that followed the
/// `ContentInfo`. Trailing bytes are common (attribute certificates are
/// padded) so they are left to the caller to judge.
pub fn parse_signed_data(
    bytes: &[u8],
) -> Result<(SignedData, &[u8]), Pkcs7Error> {
    let (content_info, rest) = decode_prefix::<ContentInfo>(bytes)?;

    if content_info.content_type != ID_SIGNED_DATA {
        return Err(Pkcs7Error::NotSignedData(content_info.content_type));
    }
    let signed_data = content_info
        .content
        .decode_as::<SignedData>()
        .map_err(Pkcs7Error::InvalidSignedData)?;

    if signed_data.signer_infos.0.is_empty() {
        return Err(Pkcs7Error::NoSignerInfo);
    }
    Ok((signed_data, rest))
}
