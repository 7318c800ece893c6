//! Issued-certificate domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::key::KeyStrengthMetadata;
use crate::models::subject::Subject;

/// Lifecycle status of an issued certificate.
///
/// `Expired` and `Revoked` are terminal. When concurrent writers disagree,
/// the precedence order `Revoked > Expired > NearExpiry > Active` decides
/// which status wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Active,
    NearExpiry,
    Expired,
    Revoked,
}

impl CertificateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CertificateStatus::Expired | CertificateStatus::Revoked)
    }

    /// Rank in the precedence order; higher wins a write race.
    pub fn precedence(&self) -> u8 {
        match self {
            CertificateStatus::Active => 0,
            CertificateStatus::NearExpiry => 1,
            CertificateStatus::Expired => 2,
            CertificateStatus::Revoked => 3,
        }
    }
}

/// RFC 5280 CRLReason codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Numeric CRLReason code as carried in CRL entry extensions.
    pub fn code(&self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateKind {
    EndEntity,
    Ca,
}

/// An issued X.509 certificate as tracked by the repository.
///
/// The serial number (colon-grouped lowercase hex) is the primary key and
/// unique across the whole repository. After issuance only `status`,
/// `revocation_reason`, and `revocation_timestamp` may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub serial_number: String,
    /// Id of the CA that signed this certificate.
    pub issuing_ca_id: String,
    pub subject: Subject,
    pub key_metadata: KeyStrengthMetadata,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<RevocationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_timestamp: Option<DateTime<Utc>>,
    /// PEM-encoded DER bytes of the certificate.
    pub certificate_pem: String,
    /// SHA-256 fingerprint of the DER bytes, colon-grouped uppercase hex.
    pub fingerprint: String,
    pub kind: CertificateKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, incremented on every update.
    #[serde(default)]
    pub revision: i64,
}

impl Certificate {
    /// The status this certificate should have at `now`, judging only by
    /// its validity window and the preventive reenrollment delta. Terminal
    /// stored statuses are never downgraded by the caller.
    pub fn expected_status(&self, now: DateTime<Utc>, preventive_delta: chrono::Duration) -> CertificateStatus {
        if now >= self.not_after {
            CertificateStatus::Expired
        } else if now >= self.not_after - preventive_delta {
            CertificateStatus::NearExpiry
        } else {
            CertificateStatus::Active
        }
    }
}
