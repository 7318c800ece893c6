//! Key metadata and derived key-strength classification.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Rsa,
    Ecdsa,
}

/// Derived strength label for a key, computed from its type and size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStrength {
    Low,
    Medium,
    High,
}

/// Requested key parameters (engine input).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyMetadata {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    /// Modulus size for RSA, field size for ECDSA (256 = P-256, 384 = P-384).
    pub bits: u32,
}

/// Key parameters plus the derived strength label (stored on entities).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyStrengthMetadata {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub bits: u32,
    pub strength: KeyStrength,
}

impl KeyMetadata {
    pub fn rsa(bits: u32) -> Self {
        Self {
            key_type: KeyType::Rsa,
            bits,
        }
    }

    pub fn ecdsa(bits: u32) -> Self {
        Self {
            key_type: KeyType::Ecdsa,
            bits,
        }
    }

    pub fn with_strength(self) -> KeyStrengthMetadata {
        KeyStrengthMetadata {
            key_type: self.key_type,
            bits: self.bits,
            strength: derive_strength(self.key_type, self.bits),
        }
    }
}

/// RSA: below 2048 is weak, 2048 up to (but excluding) 3072 is medium,
/// 3072 and above is high. ECDSA: field sizes of 128 bits or less are weak,
/// up to 255 medium, 256 and above high.
pub fn derive_strength(key_type: KeyType, bits: u32) -> KeyStrength {
    match key_type {
        KeyType::Rsa => {
            if bits < 2048 {
                KeyStrength::Low
            } else if bits < 3072 {
                KeyStrength::Medium
            } else {
                KeyStrength::High
            }
        }
        KeyType::Ecdsa => {
            if bits <= 128 {
                KeyStrength::Low
            } else if bits < 256 {
                KeyStrength::Medium
            } else {
                KeyStrength::High
            }
        }
    }
}
