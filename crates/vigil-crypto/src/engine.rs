//! The polymorphic crypto-engine seam.
//!
//! One tagged-variant interface, three backends: local PEM files, a
//! HashiCorp Vault server, and AWS KMS. Services never branch on the
//! variant; they validate requested key parameters against
//! [`EngineInfo::supports`] and then talk to [`CryptoEngine`] and
//! [`Signer`] uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use vigil_core::models::key::{KeyMetadata, KeyType};

use crate::aws::{AwsKmsEngine, KmsSigner};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeyAlgorithm;
use crate::local::{LocalPemEngine, LocalSigner};
use crate::vault::{VaultEngine, VaultSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

/// One supported key family with its size bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedKeyTypeInfo {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub minimum_size: u32,
    pub maximum_size: u32,
}

/// Capability advertisement for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub engine_id: String,
    pub provider: String,
    pub model: String,
    pub supported_key_types: Vec<SupportedKeyTypeInfo>,
    pub supports_delete: bool,
    pub supports_key_import: bool,
}

impl EngineInfo {
    /// Whether this engine can create a key with the given parameters.
    /// Callers must check this before any `create_*` call.
    pub fn supports(&self, meta: &KeyMetadata) -> bool {
        self.supported_key_types.iter().any(|info| {
            info.key_type == meta.key_type
                && meta.bits >= info.minimum_size
                && meta.bits <= info.maximum_size
        })
    }
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// A handle to one signing key inside an engine.
///
/// The public key is captured at construction, so it is stable for the
/// lifetime of the key id regardless of backend round-trips.
pub enum Signer {
    Local(LocalSigner),
    Vault(VaultSigner),
    AwsKms(KmsSigner),
}

impl Signer {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Signer::Local(s) => s.algorithm(),
            Signer::Vault(s) => s.algorithm(),
            Signer::AwsKms(s) => s.algorithm(),
        }
    }

    /// SPKI DER of the public key.
    pub fn public_key_der(&self) -> &[u8] {
        match self {
            Signer::Local(s) => s.public_key_der(),
            Signer::Vault(s) => s.public_key_der(),
            Signer::AwsKms(s) => s.public_key_der(),
        }
    }

    /// Sign `message`, hashing with `hash` as needed by the backend.
    /// Returns PKCS#1 v1.5 (RSA) or ASN.1 DER (ECDSA) signature bytes.
    pub async fn sign(&self, message: &[u8], hash: HashAlgorithm) -> CryptoResult<Vec<u8>> {
        match self {
            Signer::Local(s) => s.sign(message, hash),
            Signer::Vault(s) => s.sign(message, hash).await,
            Signer::AwsKms(s) => s.sign(message, hash).await,
        }
    }
}

// ---------------------------------------------------------------------------
// CryptoEngine
// ---------------------------------------------------------------------------

/// A crypto engine: generates, stores, and signs with private keys.
pub enum CryptoEngine {
    LocalPem(LocalPemEngine),
    Vault(VaultEngine),
    AwsKms(AwsKmsEngine),
}

impl CryptoEngine {
    pub fn engine_info(&self) -> &EngineInfo {
        match self {
            CryptoEngine::LocalPem(e) => e.engine_info(),
            CryptoEngine::Vault(e) => e.engine_info(),
            CryptoEngine::AwsKms(e) => e.engine_info(),
        }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_info().engine_id
    }

    /// Create an RSA signing key. Idempotent on key-id collision only when
    /// the existing key has the same parameters.
    pub async fn create_rsa_key(&self, bits: u32, key_id: &str) -> CryptoResult<Signer> {
        self.create_key(KeyAlgorithm::Rsa { bits }, key_id).await
    }

    /// Create an ECDSA signing key (`bits` selects the curve: 256 or 384).
    pub async fn create_ecdsa_key(&self, bits: u32, key_id: &str) -> CryptoResult<Signer> {
        let algorithm = match bits {
            256 => KeyAlgorithm::EcdsaP256,
            384 => KeyAlgorithm::EcdsaP384,
            other => {
                return Err(CryptoError::UnsupportedKey(format!(
                    "unsupported ECDSA curve size {other}"
                )));
            }
        };
        self.create_key(algorithm, key_id).await
    }

    pub async fn create_key(&self, algorithm: KeyAlgorithm, key_id: &str) -> CryptoResult<Signer> {
        if !self.engine_info().supports(&algorithm.metadata()) {
            return Err(CryptoError::UnsupportedKey(format!(
                "engine {} does not support {algorithm:?}",
                self.engine_id()
            )));
        }
        match self {
            CryptoEngine::LocalPem(e) => e.create_key(algorithm, key_id).await.map(Signer::Local),
            CryptoEngine::Vault(e) => e.create_key(algorithm, key_id).await.map(Signer::Vault),
            CryptoEngine::AwsKms(e) => e.create_key(algorithm, key_id).await.map(Signer::AwsKms),
        }
    }

    /// Fetch the signer for an existing key id.
    pub async fn signer(&self, key_id: &str) -> CryptoResult<Signer> {
        match self {
            CryptoEngine::LocalPem(e) => e.signer(key_id).await.map(Signer::Local),
            CryptoEngine::Vault(e) => e.signer(key_id).await.map(Signer::Vault),
            CryptoEngine::AwsKms(e) => e.signer(key_id).await.map(Signer::AwsKms),
        }
    }

    /// Delete a key. Engines that do not own key destruction reject this.
    pub async fn delete_key(&self, key_id: &str) -> CryptoResult<()> {
        match self {
            CryptoEngine::LocalPem(e) => e.delete_key(key_id).await,
            CryptoEngine::Vault(e) => e.delete_key(key_id).await,
            CryptoEngine::AwsKms(e) => e.delete_key(key_id).await,
        }
    }

    /// Import externally generated key material (local engine only).
    pub async fn import_key(&self, key_id: &str, key_pem: &str) -> CryptoResult<Signer> {
        match self {
            CryptoEngine::LocalPem(e) => e.import_key(key_id, key_pem).await.map(Signer::Local),
            _ => Err(CryptoError::Unsupported(
                "key import is only available on local PEM engines".into(),
            )),
        }
    }
}

/// The set of engines known to the control plane, keyed by engine id.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<CryptoEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: CryptoEngine) {
        self.engines
            .insert(engine.engine_id().to_string(), Arc::new(engine));
    }

    pub fn get(&self, engine_id: &str) -> CryptoResult<Arc<CryptoEngine>> {
        self.engines
            .get(engine_id)
            .cloned()
            .ok_or_else(|| CryptoError::EngineNotFound(engine_id.to_string()))
    }

    pub fn infos(&self) -> Vec<EngineInfo> {
        self.engines.values().map(|e| e.engine_info().clone()).collect()
    }
}
