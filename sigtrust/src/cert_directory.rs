// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::oid::{oid_name, DN_ORDER};
use crate::verify::public_key_bits;
use cms::cert::CertificateChoices;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use core::fmt::{self, Display, Formatter};
use der::{Tag, Tagged};
use serde::Serialize;
use std::collections::BTreeMap;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

/// Distinguished name reduced to one value per attribute type.
///
/// Only the attribute types that appear in the display order
/// (`CN, L, ST, O, OU, C, STREET, DC, UID`) are kept. When an attribute
/// repeats, the last value wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DistinguishedName {
    attributes: BTreeMap<String, String>,
}

impl DistinguishedName {
    /// Reduce an X.509 name.
    pub fn from_name(name: &Name) -> Self {
        let mut dn = Self::default();
        for atv in name.0.iter().flat_map(|rdn| rdn.0.iter()) {
            let Some((short, _)) =
                DN_ORDER.iter().find(|(_, oid)| *oid == atv.oid)
            else {
                tracing::debug!(oid = %atv.oid, "skipping DN attribute");
                continue;
            };
            if let Some(value) = decode_directory_string(&atv.value) {
                dn.insert(short, value);
            }
        }
        dn
    }

    /// Set `attribute` (e.g. `"CN"`) to `value`.
    pub fn insert(&mut self, attribute: &str, value: impl Into<String>) {
        self.attributes.insert(attribute.to_owned(), value.into());
    }

    /// Value of `attribute`, if present.
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    /// `CN`, else `OU`, else `O`, else the full formatted name.
    pub fn best_name(&self) -> String {
        ["CN", "OU", "O"]
            .iter()
            .find_map(|attr| self.get(attr))
            .map(str::to_owned)
            .unwrap_or_else(|| self.to_string())
    }
}

impl<K, V> FromIterator<(K, V)> for DistinguishedName
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dn = Self::default();
        for (attr, value) in iter {
            dn.insert(attr.as_ref(), value);
        }
        dn
    }
}

impl Display for DistinguishedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (short, _) in DN_ORDER {
            if let Some(value) = self.get(short) {
                if !first {
                    f.write_str(",")?;
                }
                first = false;
                // Values are not escaped.
                write!(f, "{short}={value}")?;
            }
        }
        Ok(())
    }
}

fn decode_directory_string(value: &der::Any) -> Option<String> {
    let bytes = value.value();
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::VisibleString
        | Tag::TeletexString => Some(String::from_utf8_lossy(bytes).into_owned()),
        Tag::BmpString => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        other => {
            tracing::debug!(tag = %other, "skipping non-string DN value");
            None
        }
    }
}

/// Serial number as lowercase hex without leading zeros.
///
/// Serials are signed integers and some certificates in the wild carry
/// negative ones; those render with a leading `-`.
pub(crate) fn serial_hex(serial: &SerialNumber) -> String {
    let bytes = serial.as_bytes();
    match bytes.first() {
        Some(first) if first & 0x80 != 0 => {
            format!("-{}", trimmed_hex(&negate(bytes)))
        }
        _ => trimmed_hex(bytes),
    }
}

fn trimmed_hex(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Magnitude of a negative big-endian two's complement integer.
fn negate(bytes: &[u8]) -> Vec<u8> {
    let mut magnitude: Vec<u8> = bytes.iter().map(|byte| !byte).collect();
    for byte in magnitude.iter_mut().rev() {
        let (sum, carry) = byte.overflowing_add(1);
        *byte = sum;
        if !carry {
            break;
        }
    }
    magnitude
}

/// Lookup key of a certificate held in a [`CertificateDirectory`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CertificateKey {
    /// Formatted subject name.
    pub subject: String,
    /// Formatted issuer name.
    pub issuer: String,
    /// Serial number in lowercase hex.
    pub serial: String,
}

struct DirectoryEntry<'a> {
    subject: DistinguishedName,
    certificate: &'a Certificate,
}

/// Certificates carried in one `SignedData`, indexed for signer lookup.
#[derive(Default)]
pub struct CertificateDirectory<'a> {
    entries: BTreeMap<CertificateKey, DirectoryEntry<'a>>,
}

impl<'a> CertificateDirectory<'a> {
    /// Index `certificates`.
    pub fn new(certificates: impl IntoIterator<Item = &'a Certificate>) -> Self {
        let mut entries = BTreeMap::new();
        for certificate in certificates {
            let tbs = &certificate.tbs_certificate;
            let subject = DistinguishedName::from_name(&tbs.subject);
            let key = CertificateKey {
                subject: subject.to_string(),
                issuer: DistinguishedName::from_name(&tbs.issuer).to_string(),
                serial: serial_hex(&tbs.serial_number),
            };
            entries.insert(
                key,
                DirectoryEntry {
                    subject,
                    certificate,
                },
            );
        }
        Self { entries }
    }

    /// Index the X.509 certificates of `signed_data`.
    ///
    /// Other certificate formats are skipped.
    pub fn from_signed_data(signed_data: &'a SignedData) -> Self {
        let certificates = signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert),
                CertificateChoices::Other(_) => {
                    tracing::debug!("skipping non-X.509 certificate");
                    None
                }
            });
        Self::new(certificates)
    }

    /// Number of indexed certificates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the lookup keys.
    pub fn keys(&self) -> impl Iterator<Item = &CertificateKey> {
        self.entries.keys()
    }

    fn find(&self, issuer: &Name, serial: &SerialNumber) -> Option<&DirectoryEntry<'a>> {
        let issuer = DistinguishedName::from_name(issuer).to_string();
        let serial = serial_hex(serial);
        self.entries
            .iter()
            .find(|(key, _)| key.issuer == issuer && key.serial == serial)
            .map(|(_, entry)| entry)
    }

    /// Subject of the certificate issued by `issuer` with `serial`.
    pub fn resolve_subject(
        &self,
        issuer: &Name,
        serial: &SerialNumber,
    ) -> Option<&DistinguishedName> {
        self.find(issuer, serial).map(|entry| &entry.subject)
    }

    /// The certificate issued by `issuer` with `serial`.
    pub fn find_certificate(
        &self,
        issuer: &Name,
        serial: &SerialNumber,
    ) -> Option<&'a Certificate> {
        self.find(issuer, serial).map(|entry| entry.certificate)
    }

    /// The certificate named by a signer identifier.
    ///
    /// Only issuer-and-serial identifiers are supported.
    pub fn signer_certificate(
        &self,
        sid: &SignerIdentifier,
    ) -> Option<&'a Certificate> {
        match sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => {
                self.find_certificate(&id.issuer, &id.serial_number)
            }
            SignerIdentifier::SubjectKeyIdentifier(_) => None,
        }
    }
}

/// Identity of a signer, as persisted for signer records.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertInfo {
    /// Signer info version.
    pub version: String,
    /// Formatted subject of the signing certificate.
    pub subject: String,
    /// Best short name of the subject.
    pub subject_short_name: String,
    /// Serial number in lowercase hex.
    pub serial_number: String,
    /// Name of the signer info's digest algorithm.
    pub digest_algorithm: String,
    /// Name of the signer info's signature algorithm.
    pub digest_encryption_algorithm: String,
    /// Size in bits of the signer's public key, 0 when unknown.
    #[serde(rename = "DigestEncryptionAlgorithmKeySize")]
    pub digest_encryption_key_size: u32,
    /// Countersignature time in seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Extract the identity of the signer behind `signer_info`.
///
/// Returns `None` when the signer's certificate is not in `directory`.
pub fn cert_info(
    signer_info: &SignerInfo,
    directory: &CertificateDirectory<'_>,
) -> Option<CertInfo> {
    let SignerIdentifier::IssuerAndSerialNumber(id) = &signer_info.sid else {
        tracing::warn!("signer identified by key identifier, skipping");
        return None;
    };
    let entry = directory.find(&id.issuer, &id.serial_number)?;

    let spki = &entry.certificate.tbs_certificate.subject_public_key_info;
    Some(CertInfo {
        version: (signer_info.version as u8).to_string(),
        subject: entry.subject.to_string(),
        subject_short_name: entry.subject.best_name(),
        serial_number: serial_hex(&id.serial_number),
        digest_algorithm: oid_name(&signer_info.digest_alg.oid),
        digest_encryption_algorithm: oid_name(
            &signer_info.signature_algorithm.oid,
        ),
        digest_encryption_key_size: public_key_bits(spki),
        timestamp: None,
    })
}
