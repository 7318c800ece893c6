//! AWS crypto backend: KMS holds CA signing keys; Secrets Manager stores
//! encoded device private keys when server-side generation is requested.

use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{KeySpec, KeyUsageType, MessageType, SigningAlgorithmSpec};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use sha2::{Digest, Sha256, Sha384};
use tracing::{debug, info, warn};

use vigil_core::models::key::KeyType;

use crate::engine::{EngineInfo, HashAlgorithm, SupportedKeyTypeInfo};
use crate::error::{CryptoError, CryptoResult};
use crate::keypair::KeyAlgorithm;

#[derive(Debug, Clone)]
pub struct AwsKmsConfig {
    pub engine_id: String,
}

/// KMS-backed engine. Keys are addressed through aliases so Vigil key ids
/// stay stable across key rotation in the AWS account.
pub struct AwsKmsEngine {
    client: aws_sdk_kms::Client,
    info: EngineInfo,
}

impl AwsKmsEngine {
    pub fn new(config: AwsKmsConfig, sdk_config: &aws_config::SdkConfig) -> Self {
        let client = aws_sdk_kms::Client::new(sdk_config);
        info!(engine_id = %config.engine_id, "Initialized AWS KMS engine");

        let info = EngineInfo {
            engine_id: config.engine_id,
            provider: "Amazon Web Services".into(),
            model: "KMS".into(),
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
            supports_delete: false,
            supports_key_import: false,
        };

        Self { client, info }
    }

    pub fn engine_info(&self) -> &EngineInfo {
        &self.info
    }

    fn alias(key_id: &str) -> String {
        format!("alias/{}", key_id.replace('/', "-"))
    }

    fn key_spec(algorithm: KeyAlgorithm) -> CryptoResult<KeySpec> {
        match algorithm {
            KeyAlgorithm::Rsa { bits: 2048 } => Ok(KeySpec::Rsa2048),
            KeyAlgorithm::Rsa { bits: 3072 } => Ok(KeySpec::Rsa3072),
            KeyAlgorithm::Rsa { bits: 4096 } => Ok(KeySpec::Rsa4096),
            KeyAlgorithm::Rsa { bits } => Err(CryptoError::UnsupportedKey(format!(
                "KMS has no RSA key spec for {bits} bits"
            ))),
            KeyAlgorithm::EcdsaP256 => Ok(KeySpec::EccNistP256),
            KeyAlgorithm::EcdsaP384 => Ok(KeySpec::EccNistP384),
        }
    }

    fn algorithm_from_spec(spec: &KeySpec) -> CryptoResult<KeyAlgorithm> {
        match spec {
            KeySpec::Rsa2048 => Ok(KeyAlgorithm::Rsa { bits: 2048 }),
            KeySpec::Rsa3072 => Ok(KeyAlgorithm::Rsa { bits: 3072 }),
            KeySpec::Rsa4096 => Ok(KeyAlgorithm::Rsa { bits: 4096 }),
            KeySpec::EccNistP256 => Ok(KeyAlgorithm::EcdsaP256),
            KeySpec::EccNistP384 => Ok(KeyAlgorithm::EcdsaP384),
            other => Err(CryptoError::Backend(format!(
                "KMS key has unsupported spec {other:?}"
            ))),
        }
    }

    async fn describe_alias(&self, alias: &str) -> CryptoResult<Option<KeyAlgorithm>> {
        match self.client.describe_key().key_id(alias).send().await {
            Ok(output) => {
                let spec = output
                    .key_metadata()
                    .and_then(|m| m.key_spec())
                    .cloned()
                    .ok_or_else(|| CryptoError::Backend("KMS key has no key spec".into()))?;
                Ok(Some(Self::algorithm_from_spec(&spec)?))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found_exception() {
                    Ok(None)
                } else {
                    Err(CryptoError::Backend(format!(
                        "KMS describe key: {service_err}"
                    )))
                }
            }
        }
    }

    async fn fetch_public_key(&self, alias: &str) -> CryptoResult<Vec<u8>> {
        let output = self
            .client
            .get_public_key()
            .key_id(alias)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("KMS get public key: {e}")))?;
        Ok(output
            .public_key()
            .ok_or_else(|| CryptoError::Backend("KMS returned no public key".into()))?
            .as_ref()
            .to_vec())
    }

    pub async fn create_key(
        &self,
        algorithm: KeyAlgorithm,
        key_id: &str,
    ) -> CryptoResult<KmsSigner> {
        let alias = Self::alias(key_id);

        if let Some(existing) = self.describe_alias(&alias).await? {
            if existing == algorithm {
                debug!(key_id, "KMS key already present with matching parameters");
                return self.signer(key_id).await;
            }
            return Err(CryptoError::KeyAlreadyExists(key_id.to_string()));
        }

        let created = self
            .client
            .create_key()
            .key_usage(KeyUsageType::SignVerify)
            .key_spec(Self::key_spec(algorithm)?)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("KMS create key: {e}")))?;
        let arn = created
            .key_metadata()
            .map(|m| m.arn().unwrap_or_default().to_string())
            .unwrap_or_default();
        debug!(key_id, %arn, "created KMS key");

        if let Err(e) = self
            .client
            .create_alias()
            .alias_name(&alias)
            .target_key_id(&arn)
            .send()
            .await
        {
            warn!(key_id, %arn, error = %e, "could not create alias for KMS key");
            return Err(CryptoError::Backend(format!("KMS create alias: {e}")));
        }

        self.signer(key_id).await
    }

    pub async fn signer(&self, key_id: &str) -> CryptoResult<KmsSigner> {
        let alias = Self::alias(key_id);
        let algorithm = self
            .describe_alias(&alias)
            .await?
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        let public_key_der = self.fetch_public_key(&alias).await?;
        Ok(KmsSigner {
            client: self.client.clone(),
            alias,
            algorithm,
            public_key_der,
        })
    }

    pub async fn delete_key(&self, key_id: &str) -> CryptoResult<()> {
        Err(CryptoError::Unsupported(format!(
            "cannot delete key [{key_id}]; manage KMS key lifecycles in the AWS console"
        )))
    }
}

/// Signer delegating digest signatures to a KMS key.
pub struct KmsSigner {
    client: aws_sdk_kms::Client,
    alias: String,
    algorithm: KeyAlgorithm,
    public_key_der: Vec<u8>,
}

impl KmsSigner {
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn signing_algorithm(&self, hash: HashAlgorithm) -> CryptoResult<SigningAlgorithmSpec> {
        match (self.algorithm, hash) {
            (KeyAlgorithm::Rsa { .. }, HashAlgorithm::Sha256) => {
                Ok(SigningAlgorithmSpec::RsassaPkcs1V15Sha256)
            }
            (KeyAlgorithm::Rsa { .. }, HashAlgorithm::Sha384) => {
                Ok(SigningAlgorithmSpec::RsassaPkcs1V15Sha384)
            }
            (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha256) => {
                Ok(SigningAlgorithmSpec::EcdsaSha256)
            }
            (KeyAlgorithm::EcdsaP384, HashAlgorithm::Sha384) => {
                Ok(SigningAlgorithmSpec::EcdsaSha384)
            }
            (algorithm, hash) => Err(CryptoError::UnsupportedKey(format!(
                "{hash:?} is not usable with {algorithm:?}"
            ))),
        }
    }

    pub async fn sign(&self, message: &[u8], hash: HashAlgorithm) -> CryptoResult<Vec<u8>> {
        let digest: Vec<u8> = match hash {
            HashAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
        };

        let output = self
            .client
            .sign()
            .key_id(&self.alias)
            .message(Blob::new(digest))
            .message_type(MessageType::Digest)
            .signing_algorithm(self.signing_algorithm(hash)?)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("KMS sign: {e}")))?;

        Ok(output
            .signature()
            .ok_or_else(|| CryptoError::SigningFailed("KMS returned no signature".into()))?
            .as_ref()
            .to_vec())
    }
}

// ---------------------------------------------------------------------------
// Secrets Manager key store
// ---------------------------------------------------------------------------

/// Stores PEM-encoded device private keys in AWS Secrets Manager, base64
/// wrapped in a `{"key": …}` JSON document.
pub struct AwsSecretsKeyStore {
    client: aws_sdk_secretsmanager::Client,
}

impl AwsSecretsKeyStore {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(sdk_config),
        }
    }

    pub async fn store(&self, key_id: &str, key_pem: &str) -> CryptoResult<()> {
        let secret = json!({ "key": BASE64.encode(key_pem.as_bytes()) }).to_string();
        self.client
            .create_secret()
            .name(key_id)
            .secret_string(secret)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Secrets Manager create: {e}")))?;
        debug!(key_id, "archived device key in Secrets Manager");
        Ok(())
    }

    pub async fn load(&self, key_id: &str) -> CryptoResult<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(key_id)
            .send()
            .await
            .map_err(|e| CryptoError::Backend(format!("Secrets Manager get: {e}")))?;
        let secret = output
            .secret_string()
            .ok_or_else(|| CryptoError::Backend("secret has no string value".into()))?;
        let parsed: serde_json::Value = serde_json::from_str(secret)
            .map_err(|e| CryptoError::Encoding(format!("secret is not JSON: {e}")))?;
        let encoded = parsed["key"]
            .as_str()
            .ok_or_else(|| CryptoError::Encoding("'key' not found in secret".into()))?;
        let pem = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("secret key decode: {e}")))?;
        String::from_utf8(pem).map_err(|e| CryptoError::Encoding(format!("secret key utf8: {e}")))
    }

    pub async fn delete(&self, key_id: &str) -> CryptoResult<()> {
        Err(CryptoError::Unsupported(format!(
            "cannot delete key [{key_id}]; manage secrets in the AWS console"
        )))
    }
}
