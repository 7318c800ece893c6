//! X.509 certificate assembly.
//!
//! The TBS structure is built locally, DER-encoded, and signed through the
//! engine [`Signer`] seam, so the same path serves file-backed keys and
//! remote Vault/KMS keys.

use chrono::{DateTime, Utc};
use der::asn1::{BitString, OctetString};
use der::{Decode, Encode};
use sha1::{Digest, Sha1};
use x509_cert::certificate::{CertificateInner, TbsCertificateInner, Version};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
    SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;

use const_oid::AssociatedOid;

use vigil_core::models::subject::Subject;

use crate::engine::{HashAlgorithm, Signer};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeyAlgorithm;
use crate::x509::{der_to_pem, fingerprint_sha256, subject_to_name, to_x509_time};

/// Everything needed to mint one certificate.
pub struct CertificateSpec {
    pub serial: Vec<u8>,
    pub subject: Subject,
    /// SPKI DER of the key being certified.
    pub subject_spki_der: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// BasicConstraints path length for CA certificates.
    pub path_len: Option<u8>,
    /// Raw SubjectAltName extension value reproduced verbatim (sign-verbatim
    /// enrollments copy this straight from the CSR).
    pub san_der: Option<Vec<u8>>,
}

/// Issuer identity when the certificate is not self-signed.
pub struct IssuerIdentity<'a> {
    pub subject: &'a Subject,
    pub serial: &'a [u8],
}

/// The finished certificate in its wire forms.
pub struct BuiltCertificate {
    pub der: Vec<u8>,
    pub pem: String,
    pub fingerprint: String,
}

/// The AlgorithmIdentifier for a key/hash pair. RSA identifiers carry an
/// explicit NULL parameter per RFC 4055.
pub fn signature_algorithm(
    key: KeyAlgorithm,
    hash: HashAlgorithm,
) -> CryptoResult<AlgorithmIdentifierOwned> {
    let identifier = match (key, hash) {
        (KeyAlgorithm::Rsa { .. }, HashAlgorithm::Sha256) => AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            parameters: Some(der::Any::null()),
        },
        (KeyAlgorithm::Rsa { .. }, HashAlgorithm::Sha384) => AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            parameters: Some(der::Any::null()),
        },
        (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha256) => AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
            parameters: None,
        },
        (KeyAlgorithm::EcdsaP384, HashAlgorithm::Sha384) => AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_384,
            parameters: None,
        },
        (key, hash) => {
            return Err(CryptoError::UnsupportedKey(format!(
                "{hash:?} is not usable with {key:?}"
            )));
        }
    };
    Ok(identifier)
}

fn extension<T: AssociatedOid + Encode>(value: &T, critical: bool) -> CryptoResult<Extension> {
    Ok(Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

/// SHA-1 over the raw public-key bits, the conventional key identifier.
pub(crate) fn key_identifier(spki_der: &[u8]) -> CryptoResult<Vec<u8>> {
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der)?;
    let bits = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| CryptoError::Encoding("public key has unused bits".into()))?;
    Ok(Sha1::digest(bits).to_vec())
}

/// Build and sign a certificate. `issuer = None` produces a self-signed
/// certificate (issuer name and AKI serial taken from the spec itself).
pub async fn issue(
    spec: &CertificateSpec,
    issuer: Option<IssuerIdentity<'_>>,
    signer: &Signer,
) -> CryptoResult<BuiltCertificate> {
    let hash = signer.algorithm().default_hash();
    let algorithm = signature_algorithm(signer.algorithm(), hash)?;

    let subject_name = subject_to_name(&spec.subject)?;
    let (issuer_name, issuer_serial): (Name, &[u8]) = match &issuer {
        Some(identity) => (subject_to_name(identity.subject)?, identity.serial),
        None => (subject_name.clone(), spec.serial.as_slice()),
    };

    let mut extensions = vec![
        extension(
            &BasicConstraints {
                ca: spec.is_ca,
                path_len_constraint: spec.path_len,
            },
            true,
        )?,
        extension(
            &KeyUsage(if spec.is_ca {
                KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature
            } else {
                KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment
            }),
            true,
        )?,
    ];

    if !spec.is_ca {
        extensions.push(extension(
            &ExtendedKeyUsage(vec![
                const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
                const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ]),
            false,
        )?);
    }

    if let Some(san) = &spec.san_der {
        extensions.push(Extension {
            extn_id: SubjectAltName::OID,
            critical: false,
            extn_value: OctetString::new(san.clone())?,
        });
    }

    extensions.push(extension(
        &SubjectKeyIdentifier(OctetString::new(key_identifier(&spec.subject_spki_der)?)?),
        false,
    )?);
    extensions.push(extension(
        &AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(key_identifier(signer.public_key_der())?)?),
            authority_cert_issuer: None,
            authority_cert_serial_number: Some(SerialNumber::new(issuer_serial)?),
        },
        false,
    )?);

    let tbs = TbsCertificateInner::<x509_cert::certificate::Rfc5280> {
        version: Version::V3,
        serial_number: SerialNumber::new(&spec.serial)?,
        signature: algorithm.clone(),
        issuer: issuer_name,
        validity: Validity {
            not_before: to_x509_time(spec.not_before)?,
            not_after: to_x509_time(spec.not_after)?,
        },
        subject: subject_name,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(&spec.subject_spki_der)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let tbs_der = tbs.to_der()?;
    let signature = signer.sign(&tbs_der, hash).await?;

    let certificate = CertificateInner {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature)?,
    };

    let der = certificate.to_der()?;
    let fingerprint = fingerprint_sha256(&der);
    Ok(BuiltCertificate {
        pem: der_to_pem(&der, "CERTIFICATE"),
        der,
        fingerprint,
    })
}
