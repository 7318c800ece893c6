//! Local-PEM crypto engine: key material lives as PKCS#8 PEM files in a
//! configured directory and never leaves the host. The key id is the file
//! name.

use std::path::PathBuf;

use tracing::{debug, info};

use vigil_core::models::key::KeyType;

use crate::engine::{EngineInfo, HashAlgorithm, SupportedKeyTypeInfo};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::{KeyAlgorithm, KeyPair};

/// Configuration for a local PEM key store.
#[derive(Debug, Clone)]
pub struct LocalPemConfig {
    pub engine_id: String,
    /// Directory the key files live in; created if absent.
    pub directory: PathBuf,
}

pub struct LocalPemEngine {
    config: LocalPemConfig,
    info: EngineInfo,
}

/// Signer over a key pair loaded from the local store.
pub struct LocalSigner {
    key_pair: KeyPair,
    public_key_der: Vec<u8>,
}

impl LocalSigner {
    fn new(key_pair: KeyPair) -> CryptoResult<Self> {
        let public_key_der = key_pair.public_key_der()?;
        Ok(Self {
            key_pair,
            public_key_der,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.key_pair.algorithm()
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    pub fn sign(&self, message: &[u8], hash: HashAlgorithm) -> CryptoResult<Vec<u8>> {
        self.key_pair.sign(message, hash)
    }
}

impl LocalPemEngine {
    pub async fn open(config: LocalPemConfig) -> CryptoResult<Self> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|e| {
                CryptoError::Backend(format!(
                    "could not create key directory {}: {e}",
                    config.directory.display()
                ))
            })?;
        info!(
            engine_id = %config.engine_id,
            directory = %config.directory.display(),
            "Opened local PEM key store"
        );

        let info = EngineInfo {
            engine_id: config.engine_id.clone(),
            provider: "Vigil".into(),
            model: "Local PEM filesystem".into(),
            supported_key_types: vec![
                SupportedKeyTypeInfo {
                    key_type: KeyType::Rsa,
                    minimum_size: 2048,
                    maximum_size: 4096,
                },
                SupportedKeyTypeInfo {
                    key_type: KeyType::Ecdsa,
                    minimum_size: 256,
                    maximum_size: 384,
                },
            ],
            supports_delete: true,
            supports_key_import: true,
        };

        Ok(Self { config, info })
    }

    pub fn engine_info(&self) -> &EngineInfo {
        &self.info
    }

    fn key_path(&self, key_id: &str) -> CryptoResult<PathBuf> {
        if key_id.is_empty()
            || key_id.contains('/')
            || key_id.contains('\\')
            || key_id.contains("..")
        {
            return Err(CryptoError::InvalidInput(format!(
                "invalid key id '{key_id}'"
            )));
        }
        Ok(self.config.directory.join(format!("{key_id}.pem")))
    }

    pub async fn create_key(
        &self,
        algorithm: KeyAlgorithm,
        key_id: &str,
    ) -> CryptoResult<LocalSigner> {
        let path = self.key_path(key_id)?;

        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CryptoError::Backend(e.to_string()))?
        {
            // Idempotent only when the stored key matches the request.
            let existing = self.signer(key_id).await?;
            if existing.algorithm() == algorithm {
                debug!(key_id, "key already present with matching parameters");
                return Ok(existing);
            }
            return Err(CryptoError::KeyAlreadyExists(key_id.to_string()));
        }

        // RSA generation can take seconds; keep it off the async workers.
        let key_pair = tokio::task::spawn_blocking(move || KeyPair::generate(algorithm))
            .await
            .map_err(|e| CryptoError::Backend(format!("keygen task failed: {e}")))??;

        let pem = key_pair.to_pkcs8_pem()?;
        tokio::fs::write(&path, pem.as_bytes())
            .await
            .map_err(|e| CryptoError::Backend(format!("could not write key file: {e}")))?;
        debug!(key_id, path = %path.display(), "generated key");

        LocalSigner::new(key_pair)
    }

    pub async fn signer(&self, key_id: &str) -> CryptoResult<LocalSigner> {
        let path = self.key_path(key_id)?;
        let pem = match tokio::fs::read_to_string(&path).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CryptoError::KeyNotFound(key_id.to_string()));
            }
            Err(e) => return Err(CryptoError::Backend(e.to_string())),
        };
        LocalSigner::new(KeyPair::from_pkcs8_pem(&pem)?)
    }

    pub async fn import_key(&self, key_id: &str, key_pem: &str) -> CryptoResult<LocalSigner> {
        let path = self.key_path(key_id)?;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CryptoError::Backend(e.to_string()))?
        {
            return Err(CryptoError::KeyAlreadyExists(key_id.to_string()));
        }
        // Validate before persisting.
        let key_pair = KeyPair::from_pkcs8_pem(key_pem)?;
        tokio::fs::write(&path, key_pem.as_bytes())
            .await
            .map_err(|e| CryptoError::Backend(format!("could not write key file: {e}")))?;
        info!(key_id, "imported key");
        LocalSigner::new(key_pair)
    }

    pub async fn delete_key(&self, key_id: &str) -> CryptoResult<()> {
        let path = self.key_path(key_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CryptoError::KeyNotFound(key_id.to_string()))
            }
            Err(e) => Err(CryptoError::Backend(e.to_string())),
        }
    }
}
