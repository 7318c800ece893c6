//! Device-management-service (DMS) domain model and approval state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::key::KeyStrengthMetadata;
use crate::models::subject::Subject;

/// DMS approval status.
///
/// A DMS starts in `PendingApproval`; an operator either approves (which
/// signs its CSR) or rejects it. Approved DMS instances can later be
/// revoked or expire. Any other transition is illegal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DmsStatus {
    PendingApproval,
    Approved,
    Rejected,
    Revoked,
    Expired,
}

impl DmsStatus {
    pub fn can_transition_to(&self, next: DmsStatus) -> bool {
        matches!(
            (self, next),
            (
                DmsStatus::PendingApproval,
                DmsStatus::Approved | DmsStatus::Rejected
            ) | (DmsStatus::Approved, DmsStatus::Revoked | DmsStatus::Expired)
        )
    }
}

/// Profile for an extra (non-identity) device slot a DMS provisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraSlotProfile {
    /// Whether the slot value must be encrypted to the device public key.
    pub confidential: bool,
    pub preventive_reenrollment_delta_secs: i64,
    pub critical_reenrollment_delta_secs: i64,
}

/// How devices owned by this DMS are provisioned at first enrollment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentSettings {
    /// CA ids a device enrollment may target (checked against the EST
    /// `aps` segment in addition to the DMS authorized-CA list).
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub extra_slots: std::collections::HashMap<String, ExtraSlotProfile>,
}

/// Reenrollment policy applied to the identity slot of owned devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReenrollmentSettings {
    pub preventive_delta_secs: i64,
    pub critical_delta_secs: i64,
    /// Accept the expired predecessor certificate during reenrollment.
    pub allow_expired_renewal: bool,
    /// How long past expiry the predecessor is still accepted. `None`
    /// means never, even when `allow_expired_renewal` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_grace_secs: Option<i64>,
}

impl Default for ReenrollmentSettings {
    fn default() -> Self {
        Self {
            // One week preventive, one day critical.
            preventive_delta_secs: 7 * 24 * 3600,
            critical_delta_secs: 24 * 3600,
            allow_expired_renewal: false,
            expired_grace_secs: None,
        }
    }
}

/// Enrollment policy bundle attached to a DMS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub enrollment_settings: EnrollmentSettings,
    pub reenrollment_settings: ReenrollmentSettings,
}

/// A device management service: the trust anchor that vouches for device
/// enrollments on behalf of a fleet owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dms {
    /// Stable name, the primary key.
    pub name: String,
    pub subject: Subject,
    pub key_metadata: KeyStrengthMetadata,
    pub status: DmsStatus,
    /// Cloud-managed DMS instances enroll devices through the upstream
    /// manager; their client certificates chain to the upstream CA.
    pub cloud_dms: bool,
    /// CA ids this DMS may enroll devices against. Mutable only while
    /// the DMS is `Approved`.
    #[serde(default)]
    pub authorized_cas: Vec<String>,
    pub identity_profile: IdentityProfile,
    /// PEM-encoded CSR submitted at registration; signed on approval.
    pub csr_pem: String,
    /// Serial of the certificate issued on approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_serial: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_status_update: DateTime<Utc>,
    /// Optimistic-concurrency token, incremented on every update.
    #[serde(default)]
    pub revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dms_state_machine_accepts_exactly_the_legal_transitions() {
        let all = [
            DmsStatus::PendingApproval,
            DmsStatus::Approved,
            DmsStatus::Rejected,
            DmsStatus::Revoked,
            DmsStatus::Expired,
        ];
        let legal = [
            (DmsStatus::PendingApproval, DmsStatus::Approved),
            (DmsStatus::PendingApproval, DmsStatus::Rejected),
            (DmsStatus::Approved, DmsStatus::Revoked),
            (DmsStatus::Approved, DmsStatus::Expired),
        ];
        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }
}
