//! X.509 helpers shared by the CA and device planes: distinguished-name
//! conversion, validity times, serial numbers, fingerprints, and key
//! metadata extraction.

pub mod build;
pub mod crl;
pub mod csr;
pub mod verify;

use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use const_oid::ObjectIdentifier;
use der::asn1::{GeneralizedTime, UtcTime};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x509_cert::name::Name;
use x509_cert::time::Time;

use vigil_core::models::key::{KeyMetadata, KeyStrengthMetadata, derive_strength};
use vigil_core::models::subject::Subject;

use crate::error::{CryptoError, CryptoResult};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const OID_LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const OID_STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// Render a [`Subject`] as an X.501 name.
pub fn subject_to_name(subject: &Subject) -> CryptoResult<Name> {
    if subject.common_name.is_empty() {
        return Err(CryptoError::InvalidInput(
            "subject common name must not be empty".into(),
        ));
    }
    Name::from_str(&subject.to_rfc4514())
        .map_err(|e| CryptoError::InvalidInput(format!("invalid subject: {e}")))
}

/// Extract the components Vigil tracks from an X.501 name.
pub fn name_to_subject(name: &Name) -> Subject {
    let mut subject = Subject::default();
    for rdn in name.0.iter() {
        for attr in rdn.0.iter() {
            let value = attr
                .value
                .decode_as::<String>()
                .ok()
                .or_else(|| {
                    attr.value
                        .decode_as::<der::asn1::PrintableStringRef>()
                        .ok()
                        .map(|s| s.to_string())
                });
            let Some(value) = value else { continue };
            match attr.oid {
                OID_COMMON_NAME => subject.common_name = value,
                OID_COUNTRY => subject.country = Some(value),
                OID_LOCALITY => subject.locality = Some(value),
                OID_STATE => subject.state = Some(value),
                OID_ORGANIZATION => subject.organization = Some(value),
                OID_ORGANIZATIONAL_UNIT => subject.organization_unit = Some(value),
                _ => {}
            }
        }
    }
    subject
}

/// Convert a UTC timestamp to an X.509 validity time. Dates before 2050
/// must use UTCTime; later ones GeneralizedTime.
pub fn to_x509_time(value: DateTime<Utc>) -> CryptoResult<Time> {
    let unix = std::time::Duration::from_secs(value.timestamp().max(0) as u64);
    if value.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(unix).map_err(
            |e| CryptoError::Encoding(format!("UTCTime: {e}")),
        )?))
    } else {
        let datetime = der::DateTime::from_unix_duration(unix)
            .map_err(|e| CryptoError::Encoding(format!("GeneralizedTime: {e}")))?;
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(datetime)))
    }
}

pub fn from_x509_time(value: &Time) -> DateTime<Utc> {
    let unix = match value {
        Time::UtcTime(t) => t.to_unix_duration(),
        Time::GeneralTime(t) => t.to_unix_duration(),
    };
    DateTime::<Utc>::from_timestamp(unix.as_secs() as i64, unix.subsec_nanos()).unwrap_or_default()
}

/// Draw a fresh certificate serial from the OS entropy source. The top bit
/// is cleared so the DER INTEGER stays positive without padding.
pub fn random_serial() -> Vec<u8> {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    bytes.to_vec()
}

/// Colon-grouped lowercase hex, the canonical serial form used as the
/// certificate primary key.
pub fn format_serial(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a colon-grouped serial back into raw bytes.
pub fn parse_serial(serial: &str) -> CryptoResult<Vec<u8>> {
    serial
        .split(':')
        .map(|group| {
            u8::from_str_radix(group, 16)
                .map_err(|_| CryptoError::InvalidInput(format!("invalid serial '{serial}'")))
        })
        .collect()
}

/// Colon-grouped uppercase SHA-256 fingerprint of DER bytes.
pub fn fingerprint_sha256(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Derive key metadata (type, size, strength label) from an SPKI.
pub fn key_metadata_from_spki(spki_der: &[u8]) -> CryptoResult<KeyStrengthMetadata> {
    use spki::DecodePublicKey;

    if let Ok(key) = rsa::RsaPublicKey::from_public_key_der(spki_der) {
        use rsa::traits::PublicKeyParts;
        return Ok(KeyMetadata::rsa(key.n().bits() as u32).with_strength());
    }
    if p256::ecdsa::VerifyingKey::from_public_key_der(spki_der).is_ok() {
        return Ok(KeyMetadata::ecdsa(256).with_strength());
    }
    if p384::ecdsa::VerifyingKey::from_public_key_der(spki_der).is_ok() {
        return Ok(KeyMetadata::ecdsa(384).with_strength());
    }
    Err(CryptoError::UnsupportedKey(
        "public key is not RSA, P-256, or P-384".into(),
    ))
}

/// DER-encode any encodable structure.
pub fn der_encode<T: der::Encode>(value: &T) -> CryptoResult<Vec<u8>> {
    value.to_der().map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// PEM wrapping helpers for DER payloads.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    pem::encode(&pem::Pem::new(label, der))
}

pub fn pem_to_der(pem_str: &str) -> CryptoResult<Vec<u8>> {
    Ok(pem::parse(pem_str)
        .map_err(|e| CryptoError::Encoding(format!("PEM parse: {e}")))?
        .contents()
        .to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips_through_x501_name() {
        let subject = Subject {
            common_name: "Industrial Root CA".into(),
            organization: Some("Vigil".into()),
            organization_unit: Some("PKI".into()),
            country: Some("ES".into()),
            state: Some("Gipuzkoa".into()),
            locality: Some("Donostia".into()),
        };
        let name = subject_to_name(&subject).unwrap();
        assert_eq!(name_to_subject(&name), subject);
    }

    #[test]
    fn serial_round_trips_and_stays_positive() {
        for _ in 0..32 {
            let serial = random_serial();
            assert_eq!(serial.len(), 16);
            assert!(serial[0] < 0x80);
            let formatted = format_serial(&serial);
            assert_eq!(parse_serial(&formatted).unwrap(), serial);
        }
    }

    #[test]
    fn fingerprints_are_uppercase_and_colon_grouped() {
        let fp = fingerprint_sha256(b"der bytes");
        assert_eq!(fp.split(':').count(), 32);
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn post_2050_dates_use_generalized_time() {
        let near = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let far = DateTime::parse_from_rfc3339("2055-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(matches!(to_x509_time(near).unwrap(), Time::UtcTime(_)));
        assert!(matches!(to_x509_time(far).unwrap(), Time::GeneralTime(_)));
        assert_eq!(from_x509_time(&to_x509_time(far).unwrap()), far);
    }
}
