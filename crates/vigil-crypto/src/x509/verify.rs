//! Signature and chain verification for certificates, CSRs, and CRLs.

use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use rsa::signature::Verifier;
use sha2::{Sha256, Sha384};
use spki::DecodePublicKey;
use x509_cert::Certificate;

use crate::error::{CryptoError, CryptoResult};
use crate::x509::pem_to_der;

pub fn parse_certificate_der(der: &[u8]) -> CryptoResult<Certificate> {
    Certificate::from_der(der)
        .map_err(|e| CryptoError::InvalidInput(format!("malformed certificate: {e}")))
}

pub fn parse_certificate_pem(pem: &str) -> CryptoResult<Certificate> {
    parse_certificate_der(&pem_to_der(pem)?)
}

/// Verify a detached signature over `message` against an SPKI public key.
/// The algorithm OID selects the scheme; signatures are PKCS#1 v1.5 (RSA)
/// or ASN.1 DER (ECDSA).
pub fn verify_signature(
    spki_der: &[u8],
    message: &[u8],
    signature: &[u8],
    algorithm: &ObjectIdentifier,
) -> CryptoResult<()> {
    match *algorithm {
        const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => {
            let key = rsa::RsaPublicKey::from_public_key_der(spki_der)
                .map_err(|e| CryptoError::InvalidInput(format!("RSA public key: {e}")))?;
            let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key);
            let signature = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|e| CryptoError::VerificationFailed(format!("RSA signature: {e}")))?;
            verifying_key
                .verify(message, &signature)
                .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
        }
        const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION => {
            let key = rsa::RsaPublicKey::from_public_key_der(spki_der)
                .map_err(|e| CryptoError::InvalidInput(format!("RSA public key: {e}")))?;
            let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha384>::new(key);
            let signature = rsa::pkcs1v15::Signature::try_from(signature)
                .map_err(|e| CryptoError::VerificationFailed(format!("RSA signature: {e}")))?;
            verifying_key
                .verify(message, &signature)
                .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
        }
        const_oid::db::rfc5912::ECDSA_WITH_SHA_256 => {
            let key = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der)
                .map_err(|e| CryptoError::InvalidInput(format!("P-256 public key: {e}")))?;
            let signature = p256::ecdsa::Signature::from_der(signature)
                .map_err(|e| CryptoError::VerificationFailed(format!("ECDSA signature: {e}")))?;
            key.verify(message, &signature)
                .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
        }
        const_oid::db::rfc5912::ECDSA_WITH_SHA_384 => {
            let key = p384::ecdsa::VerifyingKey::from_public_key_der(spki_der)
                .map_err(|e| CryptoError::InvalidInput(format!("P-384 public key: {e}")))?;
            let signature = p384::ecdsa::Signature::from_der(signature)
                .map_err(|e| CryptoError::VerificationFailed(format!("ECDSA signature: {e}")))?;
            key.verify(message, &signature)
                .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
        }
        other => Err(CryptoError::UnsupportedKey(format!(
            "unsupported signature algorithm {other}"
        ))),
    }
}

/// Check that `certificate` was issued by `issuer`: the issuer name must
/// match the issuer's subject, and the signature must verify against the
/// issuer's public key.
pub fn issued_by(certificate: &Certificate, issuer: &Certificate) -> CryptoResult<()> {
    if certificate.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(CryptoError::VerificationFailed(
            "issuer name does not match the CA subject".into(),
        ));
    }

    let spki_der = issuer
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let message = certificate
        .tbs_certificate
        .to_der()
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let signature = certificate
        .signature
        .as_bytes()
        .ok_or_else(|| CryptoError::VerificationFailed("signature has unused bits".into()))?;

    verify_signature(
        &spki_der,
        &message,
        signature,
        &certificate.signature_algorithm.oid,
    )
}
