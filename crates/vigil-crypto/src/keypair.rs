//! In-process key pairs for engines that hold key material locally.

use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384};
use spki::EncodePublicKey;

use vigil_core::models::key::{KeyMetadata, KeyType};

use crate::engine::HashAlgorithm;
use crate::error::{CryptoError, CryptoResult};

/// Key algorithms the engines can generate and sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa { bits: u32 },
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    pub fn from_metadata(meta: &KeyMetadata) -> CryptoResult<Self> {
        match (meta.key_type, meta.bits) {
            (KeyType::Rsa, bits @ 2048..=4096) => Ok(KeyAlgorithm::Rsa { bits }),
            (KeyType::Ecdsa, 256) => Ok(KeyAlgorithm::EcdsaP256),
            (KeyType::Ecdsa, 384) => Ok(KeyAlgorithm::EcdsaP384),
            (key_type, bits) => Err(CryptoError::UnsupportedKey(format!(
                "{key_type:?} with {bits} bits"
            ))),
        }
    }

    pub fn metadata(&self) -> KeyMetadata {
        match self {
            KeyAlgorithm::Rsa { bits } => KeyMetadata::rsa(*bits),
            KeyAlgorithm::EcdsaP256 => KeyMetadata::ecdsa(256),
            KeyAlgorithm::EcdsaP384 => KeyMetadata::ecdsa(384),
        }
    }

    /// The hash this key signs with unless the caller overrides it.
    pub fn default_hash(&self) -> HashAlgorithm {
        match self {
            KeyAlgorithm::Rsa { .. } | KeyAlgorithm::EcdsaP256 => HashAlgorithm::Sha256,
            KeyAlgorithm::EcdsaP384 => HashAlgorithm::Sha384,
        }
    }
}

/// A locally held private key (RSA PKCS#1 v1.5 or ECDSA).
pub enum KeyPair {
    Rsa(Box<RsaPrivateKey>),
    EcdsaP256(p256::ecdsa::SigningKey),
    EcdsaP384(p384::ecdsa::SigningKey),
}

impl KeyPair {
    /// Generate a fresh key pair. RSA generation is CPU-bound; callers on
    /// an async runtime should wrap this in `spawn_blocking`.
    pub fn generate(algorithm: KeyAlgorithm) -> CryptoResult<Self> {
        match algorithm {
            KeyAlgorithm::Rsa { bits } => {
                let key = RsaPrivateKey::new(&mut OsRng, bits as usize)
                    .map_err(|e| CryptoError::SigningFailed(format!("RSA keygen: {e}")))?;
                Ok(KeyPair::Rsa(Box::new(key)))
            }
            KeyAlgorithm::EcdsaP256 => Ok(KeyPair::EcdsaP256(p256::ecdsa::SigningKey::random(
                &mut OsRng,
            ))),
            KeyAlgorithm::EcdsaP384 => Ok(KeyPair::EcdsaP384(p384::ecdsa::SigningKey::random(
                &mut OsRng,
            ))),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa(key) => KeyAlgorithm::Rsa {
                bits: key.size() as u32 * 8,
            },
            KeyPair::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
            KeyPair::EcdsaP384(_) => KeyAlgorithm::EcdsaP384,
        }
    }

    /// SPKI DER of the public key.
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = match self {
            KeyPair::Rsa(key) => RsaPublicKey::from(key.as_ref()).to_public_key_der(),
            KeyPair::EcdsaP256(key) => key.verifying_key().to_public_key_der(),
            KeyPair::EcdsaP384(key) => key.verifying_key().to_public_key_der(),
        }
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Sign `message` (hashed internally) and return the signature in the
    /// form X.509 expects: PKCS#1 v1.5 for RSA, ASN.1 DER for ECDSA.
    pub fn sign(&self, message: &[u8], hash: HashAlgorithm) -> CryptoResult<Vec<u8>> {
        match (self, hash) {
            (KeyPair::Rsa(key), HashAlgorithm::Sha256) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new((**key).clone());
                Ok(signing_key.sign(message).to_vec())
            }
            (KeyPair::Rsa(key), HashAlgorithm::Sha384) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha384>::new((**key).clone());
                Ok(signing_key.sign(message).to_vec())
            }
            (KeyPair::EcdsaP256(key), HashAlgorithm::Sha256) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                Ok(signature.to_der().to_vec())
            }
            (KeyPair::EcdsaP384(key), HashAlgorithm::Sha384) => {
                let signature: p384::ecdsa::Signature = key.sign(message);
                Ok(signature.to_der().to_vec())
            }
            (_, hash) => Err(CryptoError::UnsupportedKey(format!(
                "{hash:?} is not usable with this key type"
            ))),
        }
    }

    pub fn to_pkcs8_pem(&self) -> CryptoResult<String> {
        let pem = match self {
            KeyPair::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            KeyPair::EcdsaP256(key) => key.to_pkcs8_pem(LineEnding::LF),
            KeyPair::EcdsaP384(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// Parse a PKCS#8 PEM private key, probing the supported algorithms.
    pub fn from_pkcs8_pem(pem: &str) -> CryptoResult<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::Rsa(Box::new(key)));
        }
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::EcdsaP256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::EcdsaP384(key));
        }
        Err(CryptoError::InvalidInput(
            "not a supported PKCS#8 private key (RSA, P-256, P-384)".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdsa_p256_round_trips_through_pkcs8() {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let pem = key.to_pkcs8_pem().unwrap();
        let restored = KeyPair::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(restored.algorithm(), KeyAlgorithm::EcdsaP256);
        assert_eq!(
            key.public_key_der().unwrap(),
            restored.public_key_der().unwrap()
        );
    }

    #[test]
    fn ecdsa_signature_is_der_encoded() {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let sig = key.sign(b"payload", HashAlgorithm::Sha256).unwrap();
        // DER SEQUENCE tag.
        assert_eq!(sig[0], 0x30);
        p256::ecdsa::Signature::from_der(&sig).unwrap();
    }

    #[test]
    fn p384_defaults_to_sha384() {
        assert_eq!(KeyAlgorithm::EcdsaP384.default_hash(), HashAlgorithm::Sha384);
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP384).unwrap();
        assert!(key.sign(b"payload", HashAlgorithm::Sha256).is_err());
    }
}
