//! Vigil Crypto — pluggable crypto engines and X.509 assembly.
//!
//! This crate provides:
//! - The polymorphic engine seam ([`engine::CryptoEngine`], [`engine::Signer`])
//! - Local PEM, HashiCorp Vault, and AWS KMS backends
//! - X.509 certificate, CSR, and CRL assembly signed through any engine
//! - Chain and signature verification

pub mod aws;
pub mod engine;
pub mod error;
pub mod keypair;
pub mod local;
pub mod vault;
pub mod x509;

pub use engine::{CryptoEngine, EngineInfo, EngineRegistry, HashAlgorithm, Signer};
pub use error::{CryptoError, CryptoResult};
pub use keypair::{KeyAlgorithm, KeyPair};
