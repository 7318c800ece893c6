//! HashiCorp Vault crypto engine.
//!
//! CA keys live server-side, one named key per CA at
//! `<mount>/keys/<type>/<common-name>`; digest signing is delegated to the
//! Vault sign endpoint, so private key material never reaches this
//! process. Authentication is AppRole.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha384};
use tracing::{debug, info};

use vigil_core::models::key::KeyType;

use crate::engine::{EngineInfo, HashAlgorithm, SupportedKeyTypeInfo};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeyAlgorithm;

/// Connection settings for a Vault-backed engine.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub engine_id: String,
    /// Base address, e.g. `https://vault.internal:8200`.
    pub address: String,
    /// Signing-keys mount path (without leading/trailing slashes).
    pub mount: String,
    pub role_id: String,
    pub secret_id: String,
}

/// Authenticated HTTP view of one Vault mount, shared between the engine
/// and the signers it hands out.
#[derive(Clone)]
struct VaultClient {
    http: reqwest::Client,
    address: String,
    mount: String,
    token: String,
}

impl VaultClient {
    fn key_url(&self, suffix: &str, key_name: &str) -> String {
        format!("{}/v1/{}/{suffix}/{key_name}", self.address, self.mount)
    }

    async fn sign_digest(
        &self,
        key_name: &str,
        algorithm: KeyAlgorithm,
        digest: &[u8],
        hash: HashAlgorithm,
    ) -> CryptoResult<Vec<u8>> {
        let hash_algorithm = match hash {
            HashAlgorithm::Sha256 => "sha2-256",
            HashAlgorithm::Sha384 => "sha2-384",
        };
        let mut body = json!({
            "input": BASE64.encode(digest),
            "prehashed": true,
            "hash_algorithm": hash_algorithm,
            "marshaling_algorithm": "asn1",
        });
        if matches!(algorithm, KeyAlgorithm::Rsa { .. }) {
            body["signature_algorithm"] = json!("pkcs1v15");
        }

        let response: Value = self
            .http
            .post(self.key_url("sign", key_name))
            .header("X-Vault-Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault sign: {e}")))?
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault sign rejected: {e}")))?
            .json()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault sign response: {e}")))?;

        let signature = response["data"]["signature"]
            .as_str()
            .ok_or_else(|| CryptoError::SigningFailed("Vault returned no signature".into()))?;
        // Vault prefixes signatures with the key version: `vault:v1:<b64>`.
        let encoded = signature
            .rsplit(':')
            .next()
            .ok_or_else(|| CryptoError::SigningFailed("malformed Vault signature".into()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::SigningFailed(format!("Vault signature decode: {e}")))
    }
}

pub struct VaultEngine {
    client: VaultClient,
    info: EngineInfo,
}

impl VaultEngine {
    /// Log in via AppRole and keep the client token for the engine's
    /// lifetime.
    pub async fn connect(config: VaultConfig) -> CryptoResult<Self> {
        let http = reqwest::Client::new();

        let login: Value = http
            .post(format!("{}/v1/auth/approle/login", config.address))
            .json(&json!({
                "role_id": config.role_id,
                "secret_id": config.secret_id,
            }))
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault login: {e}")))?
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault login rejected: {e}")))?
            .json()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault login response: {e}")))?;

        let token = login["auth"]["client_token"]
            .as_str()
            .ok_or_else(|| CryptoError::Backend("Vault login returned no client token".into()))?
            .to_string();

        info!(engine_id = %config.engine_id, address = %config.address, "Connected to Vault");

        let info = EngineInfo {
            engine_id: config.engine_id.clone(),
            provider: "Hashicorp".into(),
            model: "Vault".into(),
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
            supports_key_import: false,
        };

        Ok(Self {
            client: VaultClient {
                http,
                address: config.address,
                mount: config.mount,
                token,
            },
            info,
        })
    }

    pub fn engine_info(&self) -> &EngineInfo {
        &self.info
    }

    /// Vault key names cannot contain path separators; CA key ids of the
    /// form `<type>/<cn>` are flattened.
    fn key_name(key_id: &str) -> String {
        key_id.replace('/', "-")
    }

    fn vault_key_type(algorithm: KeyAlgorithm) -> CryptoResult<&'static str> {
        match algorithm {
            KeyAlgorithm::Rsa { bits: 2048 } => Ok("rsa-2048"),
            KeyAlgorithm::Rsa { bits: 3072 } => Ok("rsa-3072"),
            KeyAlgorithm::Rsa { bits: 4096 } => Ok("rsa-4096"),
            KeyAlgorithm::Rsa { bits } => Err(CryptoError::UnsupportedKey(format!(
                "Vault has no RSA key type for {bits} bits"
            ))),
            KeyAlgorithm::EcdsaP256 => Ok("ecdsa-p256"),
            KeyAlgorithm::EcdsaP384 => Ok("ecdsa-p384"),
        }
    }

    fn algorithm_from_vault_type(key_type: &str) -> CryptoResult<KeyAlgorithm> {
        match key_type {
            "rsa-2048" => Ok(KeyAlgorithm::Rsa { bits: 2048 }),
            "rsa-3072" => Ok(KeyAlgorithm::Rsa { bits: 3072 }),
            "rsa-4096" => Ok(KeyAlgorithm::Rsa { bits: 4096 }),
            "ecdsa-p256" => Ok(KeyAlgorithm::EcdsaP256),
            "ecdsa-p384" => Ok(KeyAlgorithm::EcdsaP384),
            other => Err(CryptoError::Backend(format!(
                "Vault returned unexpected key type '{other}'"
            ))),
        }
    }

    async fn read_key(&self, key_name: &str) -> CryptoResult<Option<(KeyAlgorithm, Vec<u8>)>> {
        let response = self
            .client
            .http
            .get(self.client.key_url("keys", key_name))
            .header("X-Vault-Token", &self.client.token)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault read key: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault read key: {e}")))?
            .json()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault read key response: {e}")))?;

        let data = &body["data"];
        let algorithm =
            Self::algorithm_from_vault_type(data["type"].as_str().unwrap_or_default())?;
        let latest = data["latest_version"].as_u64().unwrap_or(1).to_string();
        let public_key_pem = data["keys"][&latest]["public_key"]
            .as_str()
            .ok_or_else(|| CryptoError::Backend("Vault key has no public key".into()))?;
        let public_key_der = pem::parse(public_key_pem)
            .map_err(|e| CryptoError::Encoding(format!("Vault public key PEM: {e}")))?
            .contents()
            .to_vec();

        Ok(Some((algorithm, public_key_der)))
    }

    pub async fn create_key(
        &self,
        algorithm: KeyAlgorithm,
        key_id: &str,
    ) -> CryptoResult<VaultSigner> {
        let key_name = Self::key_name(key_id);

        if let Some((existing, public_key_der)) = self.read_key(&key_name).await? {
            if existing == algorithm {
                debug!(key_id, "Vault key already present with matching parameters");
                return Ok(VaultSigner {
                    client: self.client.clone(),
                    key_name,
                    algorithm: existing,
                    public_key_der,
                });
            }
            return Err(CryptoError::KeyAlreadyExists(key_id.to_string()));
        }

        self.client
            .http
            .post(self.client.key_url("keys", &key_name))
            .header("X-Vault-Token", &self.client.token)
            .json(&json!({
                "type": Self::vault_key_type(algorithm)?,
                "exportable": false,
            }))
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault create key: {e}")))?
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault create key rejected: {e}")))?;
        debug!(key_id, "created Vault key");

        self.signer(key_id).await
    }

    pub async fn signer(&self, key_id: &str) -> CryptoResult<VaultSigner> {
        let key_name = Self::key_name(key_id);
        let (algorithm, public_key_der) = self
            .read_key(&key_name)
            .await?
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        Ok(VaultSigner {
            client: self.client.clone(),
            key_name,
            algorithm,
            public_key_der,
        })
    }

    pub async fn delete_key(&self, key_id: &str) -> CryptoResult<()> {
        let key_name = Self::key_name(key_id);

        // Deletion must be explicitly enabled per key before Vault accepts it.
        self.client
            .http
            .post(self.client.key_url("keys", &format!("{key_name}/config")))
            .header("X-Vault-Token", &self.client.token)
            .json(&json!({ "deletion_allowed": true }))
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault key config: {e}")))?
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault key config rejected: {e}")))?;

        let response = self
            .client
            .http
            .delete(self.client.key_url("keys", &key_name))
            .header("X-Vault-Token", &self.client.token)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Vault delete key: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CryptoError::KeyNotFound(key_id.to_string()));
        }
        response
            .error_for_status()
            .map_err(|e| CryptoError::Backend(format!("Vault delete key rejected: {e}")))?;
        Ok(())
    }
}

/// Signer delegating digest signatures to a Vault-held key.
pub struct VaultSigner {
    client: VaultClient,
    key_name: String,
    algorithm: KeyAlgorithm,
    public_key_der: Vec<u8>,
}

impl VaultSigner {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    pub async fn sign(&self, message: &[u8], hash: HashAlgorithm) -> CryptoResult<Vec<u8>> {
        let digest: Vec<u8> = match hash {
            HashAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
        };
        self.client
            .sign_digest(&self.key_name, self.algorithm, &digest, hash)
            .await
    }
}
