// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use der::asn1::AnyRef;
use der::{
    Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length,
    Reader, SliceReader, Tag, TagNumber, Tagged, Writer,
};

/// Tag of `SignerInfo.signedAttrs`, `[0] IMPLICIT SET OF Attribute`.
const SIGNED_ATTRS_TAG: Tag = Tag::ContextSpecific {
    constructed: true,
    number: TagNumber::N0,
};

/// Error returned when DER input is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Asn1Error {
    /// The input is empty.
    #[error("DER input is empty")]
    Empty,

    /// A tag, length or required field is invalid.
    #[error("malformed DER: {0}")]
    Structural(#[from] der::Error),
}

/// Decode one `T` from the front of `bytes`.
///
/// Unlike [`Decode::from_der`], trailing bytes are not an error; they
/// are returned alongside the value so the caller can decide.
pub fn decode_prefix<'a, T>(bytes: &'a [u8]) -> Result<(T, &'a [u8]), Asn1Error>
where
    T: Decode<'a>,
{
    if bytes.is_empty() {
        return Err(Asn1Error::Empty);
    }
    let mut reader = SliceReader::new(bytes)?;
    let value = T::decode(&mut reader)?;
    let consumed = usize::try_from(reader.position())?;
    let remainder = bytes.get(consumed..).unwrap_or_default();
    Ok((value, remainder))
}

/// Log a warning if a decode left bytes behind.
pub(crate) fn warn_trailing_data(what: &str, remainder: &[u8]) {
    if !remainder.is_empty() {
        tracing::warn!(
            trailing = remainder.len(),
            "trailing data after {what}"
        );
    }
}

/// Split the content of a constructed value into its TLVs.
fn children(content: &[u8]) -> der::Result<Vec<AnyRef<'_>>> {
    let mut reader = SliceReader::new(content)?;
    let mut items = Vec::new();
    while !reader.is_finished() {
        items.push(reader.decode::<AnyRef<'_>>()?);
    }
    Ok(items)
}

/// Content of the first `SignerInfo` in a DER `ContentInfo` that wraps a
/// `SignedData`, exactly as encoded.
pub(crate) fn first_signer_info(content_info: &[u8]) -> Option<&[u8]> {
    let (content_info, _) = decode_prefix::<AnyRef<'_>>(content_info).ok()?;
    // ContentInfo ::= SEQUENCE { contentType, [0] EXPLICIT content }
    let explicit = children(content_info.value()).ok()?.into_iter().nth(1)?;
    let signed_data = children(explicit.value()).ok()?.into_iter().next()?;
    // signerInfos is the last field of SignedData.
    let signer_infos = children(signed_data.value()).ok()?.into_iter().last()?;
    let signer_info = children(signer_infos.value()).ok()?.into_iter().next()?;
    Some(signer_info.value())
}

/// The signed attributes of a DER `SignerInfo`, retagged as the
/// `SET OF Attribute` that the signature covers.
///
/// `signer_info` is the content of the `SignerInfo` sequence. The
/// attributes keep their encoded order: decoding into
/// [`der::asn1::SetOfVec`] re-sorts them, and a signer that did not sort
/// signed the unsorted bytes.
pub(crate) fn signed_attributes_der(signer_info: &[u8]) -> Option<Vec<u8>> {
    let attrs = children(signer_info)
        .ok()?
        .into_iter()
        .find(|item| item.tag() == SIGNED_ATTRS_TAG)?;
    AnyRef::new(Tag::Set, attrs.value()).ok()?.to_der().ok()
}

/// `SET OF T` that keeps elements in encoded order.
///
/// [`der::asn1::SetOfVec`] re-sorts elements on decode and rejects
/// repeats. Catalog files are produced by tools that do not always sort
/// and re-encoding must reproduce their bytes, so member sets are read
/// with this type instead.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LenientSetOf<T>(pub Vec<T>);

impl<T> LenientSetOf<T> {
    /// Iterate over the elements in encoded order.
    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.0.iter()
    }
}

impl<'a, T> DecodeValue<'a> for LenientSetOf<T>
where
    T: Decode<'a>,
{
    fn decode_value<R: Reader<'a>>(
        reader: &mut R,
        header: Header,
    ) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            let mut items = Vec::new();
            while !reader.is_finished() {
                items.push(T::decode(reader)?);
            }
            Ok(Self(items))
        })
    }
}

impl<T> EncodeValue for LenientSetOf<T>
where
    T: Encode,
{
    fn value_len(&self) -> der::Result<Length> {
        self.0
            .iter()
            .try_fold(Length::ZERO, |len, item| len + item.encoded_len()?)
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        for item in &self.0 {
            item.encode(writer)?;
        }
        Ok(())
    }
}

impl<T> FixedTag for LenientSetOf<T> {
    const TAG: Tag = Tag::Set;
}
