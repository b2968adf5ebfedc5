// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Public-key signature checks for signer infos.

use const_oid::db::rfc5912;
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, Encode};
use digest::Digest;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use spki::{SubjectPublicKeyInfoOwned, SubjectPublicKeyInfoRef};

/// Error returned when a signature cannot be verified.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SignatureError {
    /// The digest / signature algorithm pair is not supported.
    #[error("unsupported signature algorithm {signature} with digest {digest:?}")]
    UnsupportedAlgorithm {
        /// Digest algorithm from the signer info, if any.
        digest: Option<ObjectIdentifier>,
        /// Signature (digest encryption) algorithm.
        signature: ObjectIdentifier,
    },

    /// The signer's public key could not be decoded.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The signature bytes are not a well-formed signature.
    #[error("malformed signature value")]
    MalformedSignature,

    /// The signature does not match the signed data.
    #[error("signature does not match")]
    Mismatch,
}

/// Verify `signature` over `data` with the key in `spki`.
///
/// `digest_alg` is the signer info's digest algorithm; it selects the
/// hash when `signature_alg` is a bare key algorithm such as
/// `rsaEncryption`.
pub(crate) fn verify_signature(
    spki: &SubjectPublicKeyInfoOwned,
    digest_alg: Option<&ObjectIdentifier>,
    signature_alg: &ObjectIdentifier,
    signature: &[u8],
    data: &[u8],
) -> Result<(), SignatureError> {
    let spki_der = spki
        .to_der()
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let spki = SubjectPublicKeyInfoRef::from_der(&spki_der)
        .map_err(|_| SignatureError::InvalidPublicKey)?;

    match (digest_alg, signature_alg) {
        (Some(&rfc5912::ID_MD_5), &rfc5912::RSA_ENCRYPTION)
        | (_, &rfc5912::MD_5_WITH_RSA_ENCRYPTION) => {
            verify_rsa::<md5::Md5>(spki, signature, data)
        }
        (Some(&rfc5912::ID_SHA_1), &rfc5912::RSA_ENCRYPTION)
        | (_, &rfc5912::SHA_1_WITH_RSA_ENCRYPTION) => {
            verify_rsa::<sha1::Sha1>(spki, signature, data)
        }
        (Some(&rfc5912::ID_SHA_256), &rfc5912::RSA_ENCRYPTION)
        | (_, &rfc5912::SHA_256_WITH_RSA_ENCRYPTION) => {
            verify_rsa::<sha2::Sha256>(spki, signature, data)
        }
        (Some(&rfc5912::ID_SHA_384), &rfc5912::RSA_ENCRYPTION)
        | (_, &rfc5912::SHA_384_WITH_RSA_ENCRYPTION) => {
            verify_rsa::<sha2::Sha384>(spki, signature, data)
        }
        (Some(&rfc5912::ID_SHA_512), &rfc5912::RSA_ENCRYPTION)
        | (_, &rfc5912::SHA_512_WITH_RSA_ENCRYPTION) => {
            verify_rsa::<sha2::Sha512>(spki, signature, data)
        }
        (Some(&rfc5912::ID_SHA_256), &rfc5912::ID_EC_PUBLIC_KEY)
        | (_, &rfc5912::ECDSA_WITH_SHA_256) => {
            verify_p256(spki, signature, &sha2::Sha256::digest(data))
        }
        (Some(&rfc5912::ID_SHA_384), &rfc5912::ID_EC_PUBLIC_KEY)
        | (_, &rfc5912::ECDSA_WITH_SHA_384) => {
            verify_p256(spki, signature, &sha2::Sha384::digest(data))
        }
        _ => Err(SignatureError::UnsupportedAlgorithm {
            digest: digest_alg.copied(),
            signature: *signature_alg,
        }),
    }
}

fn verify_rsa<D>(
    spki: SubjectPublicKeyInfoRef<'_>,
    signature: &[u8],
    data: &[u8],
) -> Result<(), SignatureError>
where
    D: Digest + AssociatedOid,
{
    let key = RsaPublicKey::try_from(spki)
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let hashed = D::digest(data);

    if key.verify(Pkcs1v15Sign::new::<D>(), &hashed, signature).is_ok() {
        return Ok(());
    }

    // Some signers omit the DigestInfo prefix.
    key.verify(Pkcs1v15Sign::new_unprefixed(), &hashed, signature)
        .map_err(|_| SignatureError::Mismatch)
}

fn verify_p256(
    spki: SubjectPublicKeyInfoRef<'_>,
    signature: &[u8],
    prehash: &[u8],
) -> Result<(), SignatureError> {
    if ec_curve(&spki) != Some(rfc5912::SECP_256_R_1) {
        return Err(SignatureError::UnsupportedAlgorithm {
            digest: None,
            signature: rfc5912::ID_EC_PUBLIC_KEY,
        });
    }
    let key = p256::ecdsa::VerifyingKey::try_from(spki)
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let signature = p256::ecdsa::DerSignature::from_bytes(signature)
        .map_err(|_| SignatureError::MalformedSignature)?;
    key.verify_prehash(prehash, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

fn ec_curve(spki: &SubjectPublicKeyInfoRef<'_>) -> Option<ObjectIdentifier> {
    spki.algorithm
        .parameters
        .as_ref()
        .and_then(|params| params.decode_as::<ObjectIdentifier>().ok())
}

/// Size in bits of the public key in `spki`, or 0 if it can't be read.
pub(crate) fn public_key_bits(spki: &SubjectPublicKeyInfoOwned) -> u32 {
    let Ok(spki_der) = spki.to_der() else {
        return 0;
    };
    let Ok(spki) = SubjectPublicKeyInfoRef::from_der(&spki_der) else {
        return 0;
    };

    match spki.algorithm.oid {
        rfc5912::RSA_ENCRYPTION => RsaPublicKey::try_from(spki)
            .ok()
            .and_then(|key| u32::try_from(key.size()).ok())
            .and_then(|bytes| bytes.checked_mul(8))
            .unwrap_or(0),
        rfc5912::ID_EC_PUBLIC_KEY => match ec_curve(&spki) {
            Some(rfc5912::SECP_256_R_1) => 256,
            Some(rfc5912::SECP_384_R_1) => 384,
            Some(rfc5912::SECP_521_R_1) => 521,
            _ => 0,
        },
        _ => 0,
    }
}
