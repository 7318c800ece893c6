//! Certificate-authority domain model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::certificate::Certificate;
use crate::models::key::KeyStrengthMetadata;
use crate::models::subject::Subject;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaType {
    Root,
    Subordinate,
    DmsEnroller,
    /// Imported without a private key; can never sign.
    External,
}

/// CA lifecycle status.
///
/// Only `Active` may sign. `Pending` exists between id reservation and
/// successful key generation + self-sign; `Rotated`, `Expired`, and
/// `Revoked` are terminal for signing eligibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaStatus {
    Pending,
    Active,
    Rotated,
    Expired,
    Revoked,
}

impl CaStatus {
    pub fn may_sign(&self) -> bool {
        matches!(self, CaStatus::Active)
    }

    /// Legal state-machine transitions per the CA lifecycle.
    pub fn can_transition_to(&self, next: CaStatus) -> bool {
        match (self, next) {
            (CaStatus::Pending, CaStatus::Active) => true,
            (CaStatus::Active, CaStatus::Rotated) => true,
            (CaStatus::Active | CaStatus::Rotated, CaStatus::Expired) => true,
            (_, CaStatus::Revoked) => !matches!(self, CaStatus::Revoked),
            _ => false,
        }
    }
}

/// A certificate authority tracked by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAuthority {
    /// Stable identifier, unique across the repository.
    pub id: String,
    #[serde(rename = "type")]
    pub ca_type: CaType,
    pub subject: Subject,
    pub key_metadata: KeyStrengthMetadata,
    /// Maximum validity granted to certificates this CA issues, in seconds.
    pub issuance_duration_secs: i64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Which crypto engine holds this CA's private key.
    pub engine_id: String,
    pub status: CaStatus,
    pub serial_number: String,
    /// Parent CA id for subordinates; `None` for self-signed CAs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ca_id: Option<String>,
    /// The CA's own certificate record.
    pub certificate: Certificate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, incremented on every update.
    #[serde(default)]
    pub revision: i64,
}

impl CertificateAuthority {
    pub fn issuance_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.issuance_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_may_sign() {
        assert!(CaStatus::Active.may_sign());
        for status in [
            CaStatus::Pending,
            CaStatus::Rotated,
            CaStatus::Expired,
            CaStatus::Revoked,
        ] {
            assert!(!status.may_sign());
        }
    }

    #[test]
    fn revoked_is_terminal() {
        assert!(!CaStatus::Revoked.can_transition_to(CaStatus::Active));
        assert!(!CaStatus::Revoked.can_transition_to(CaStatus::Revoked));
        assert!(CaStatus::Expired.can_transition_to(CaStatus::Revoked));
    }

    #[test]
    fn pending_never_rotates_or_expires() {
        assert!(!CaStatus::Pending.can_transition_to(CaStatus::Rotated));
        assert!(!CaStatus::Pending.can_transition_to(CaStatus::Expired));
        assert!(CaStatus::Pending.can_transition_to(CaStatus::Active));
    }
}
